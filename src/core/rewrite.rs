// =============================================================================
// REWRITE — Réécriture d'un arbre d'expressions vers un autre type
// =============================================================================
//
// Entrée : une lambda écrite sur le type source S, et le type fonctionnel
// destination voulu. Sortie : la même requête, écrite sur D.
//
//   (dto : OrderDto) => dto.CustomerName == "Alice"
//        ↓  Expression<Func<Order, Boolean>>
//   (dto : Order) => dto.Customer.Name == "Alice"
//
// Deux tables guident la réécriture :
//
//   TYPES       S → D, amorcée par les arguments génériques des deux types
//               fonctionnels (Func<A, Boolean> → Func<B, Boolean> donne A → B,
//               Queryable<A> → Queryable<B> aussi), puis enrichie à chaque
//               membre résolu vers un type différent
//   PARAMÈTRES  ancienne identité → nouveau paramètre (même nom, type
//               substitué, identité dérivée de l'ancienne)
//
// Nœud par nœud :
//
//   Member    racine réécrite ; si son type change, le chemin est résolu
//             (resolve.rs) puis reconstruit
//   Call      receveur et arguments réécrits, arguments génériques
//             substitués, ceux liés à un sélecteur recalculés
//   Unary     Convert d'une constante mappée → constante convertie
//   Constant  convertie par la façade si son type est mappé
//   Binary    null re-typé, puis réconciliation des types des opérandes
//   Lambda    corps puis paramètres
//
// Le mode INCLUDE réécrit un sélecteur de navigation : les feuilles
// littérales sont coupées, il ne reste que le chemin à charger.
//
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::expr::{Expr, Lambda, MethodRef, ParamId, Parameter, UnaryOp};
use super::query::instantiate;
use super::registry::Registry;
use super::resolve::{build_from_infos, resolve_path};
use super::typeside::{TypeRef, Value};
use crate::error::MappingError;

/// La table de substitution des types, S → D.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSubstitution {
    map: BTreeMap<TypeRef, TypeRef>,
}

impl TypeSubstitution {
    /// Amorce la table en parcourant les deux types en parallèle.
    pub fn seed(&mut self, from: &TypeRef, to: &TypeRef) -> Result<(), MappingError> {
        match (from, to) {
            (TypeRef::Expression(a), TypeRef::Expression(b)) => self.seed(a, b),
            (TypeRef::Func { params: pa, ret: ra }, TypeRef::Func { params: pb, ret: rb }) => {
                if pa.len() != pb.len() {
                    return Err(MappingError::InvalidArgumentCount {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
                for (a, b) in pa.iter().zip(pb) {
                    self.seed(a, b)?;
                }
                self.seed(ra, rb)
            }
            (TypeRef::Generic { args: aa, .. }, TypeRef::Generic { args: ab, .. }) => {
                if aa.len() != ab.len() {
                    return Err(MappingError::InvalidArgumentCount {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
                for (a, b) in aa.iter().zip(ab) {
                    self.seed(a, b)?;
                }
                Ok(())
            }
            _ => {
                self.add(from, to);
                Ok(())
            }
        }
    }

    /// Enregistre `from → to`. La première entrée pour un type gagne.
    pub fn add(&mut self, from: &TypeRef, to: &TypeRef) {
        let skip = from == to
            || from.is_literal()
            || to.is_literal()
            || *to == TypeRef::Object
            || from.has_params()
            || to.has_params();
        if !skip && !self.map.contains_key(from) {
            debug!(from = %from, to = %to, "substitution de type");
            self.map.insert(from.clone(), to.clone());
        }
    }

    /// Ajoute les substitutions déduites d'un membre réécrit : on descend
    /// dans les génériques de même arité, sans jamais échouer.
    pub fn add_derived(&mut self, from: &TypeRef, to: &TypeRef) {
        match (from, to) {
            (TypeRef::Generic { name: na, args: aa }, TypeRef::Generic { name: nb, args: ab })
                if aa.len() == ab.len() =>
            {
                if na != nb || aa != ab {
                    for (a, b) in aa.iter().zip(ab) {
                        self.add_derived(a, b);
                    }
                }
            }
            _ => self.add(from, to),
        }
    }

    pub fn substitute(&self, ty: &TypeRef) -> TypeRef {
        ty.map_deep(&|t| self.map.get(t).cloned())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Le visiteur de réécriture. Un par appel à `map_expression`.
pub struct ExpressionMapper<'r> {
    registry: &'r Registry,
    types: TypeSubstitution,
    params: HashMap<ParamId, Parameter>,
    include: bool,
}

impl<'r> ExpressionMapper<'r> {
    pub fn new(registry: &'r Registry, types: TypeSubstitution, include: bool) -> Self {
        ExpressionMapper {
            registry,
            types,
            params: HashMap::new(),
            include,
        }
    }

    /// Fixe à l'avance le type d'un paramètre (paramètres de la lambda racine)
    pub fn bind_parameter(&mut self, old: &Parameter, ty: TypeRef) -> Parameter {
        let mapped = Parameter {
            id: old.id.derive(),
            name: old.name.clone(),
            ty,
        };
        self.params.insert(old.id, mapped.clone());
        mapped
    }

    fn map_parameter(&mut self, old: &Parameter) -> Parameter {
        if let Some(mapped) = self.params.get(&old.id) {
            return mapped.clone();
        }
        let ty = self.types.substitute(&old.ty);
        debug!(param = %old.name, from = %old.ty, to = %ty, "paramètre substitué");
        self.bind_parameter(old, ty)
    }

    pub fn visit(&mut self, expr: &Expr) -> Result<Expr, MappingError> {
        match expr {
            Expr::Parameter(p) => Ok(Expr::Parameter(self.map_parameter(p))),
            Expr::Member { .. } => self.visit_member(expr),
            Expr::Call { receiver, method, args } => self.visit_call(receiver.as_deref(), method, args),
            Expr::Unary { op, operand, ty } => self.visit_unary(*op, operand, ty),
            Expr::Constant { value, ty } => self.visit_constant(value, ty),
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Lambda(l) => Ok(Expr::Lambda(self.visit_lambda(l)?)),
        }
    }

    pub fn visit_lambda(&mut self, lambda: &Lambda) -> Result<Lambda, MappingError> {
        let body = self.visit(&lambda.body)?;
        let params = lambda.params.iter().map(|p| self.map_parameter(p)).collect();
        Ok(Lambda::new(params, body))
    }

    // -------------------------------------------------------------------------
    // Accès membres
    // -------------------------------------------------------------------------

    fn visit_member(&mut self, expr: &Expr) -> Result<Expr, MappingError> {
        let (root, members) = expr.member_chain();
        let new_root = self.visit(root)?;
        let (old_ty, new_ty) = (root.ty(), new_root.ty());

        let built = if old_ty == new_ty {
            members
                .iter()
                .fold(new_root.clone(), |target, member| target.member((*member).clone()))
        } else {
            let segments: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
            let infos = resolve_path(self.registry, &old_ty, &new_ty, &segments)?;
            let built = build_from_infos(new_root.clone(), &infos);
            self.types.add_derived(&expr.ty(), &built.ty());
            built
        };

        if self.include {
            self.trim_include(&new_root, built)
        } else {
            Ok(built)
        }
    }

    /// Réduit une navigation au chemin d'objets à charger.
    fn trim_include(&self, root: &Expr, built: Expr) -> Result<Expr, MappingError> {
        let Expr::Parameter(param) = root else {
            return Ok(built);
        };
        let mut chains: Vec<Vec<_>> = built
            .member_chains_on(param.id)
            .into_iter()
            .map(|mut chain| {
                while chain.last().is_some_and(|m| m.ty.is_literal()) {
                    chain.pop();
                }
                chain
            })
            .collect();
        chains.sort_by_key(|c| c.len());
        for pair in chains.windows(2) {
            if !pair[1].starts_with(&pair[0]) {
                return Err(MappingError::ExpressionTooComplex {
                    first: dotted(&pair[0]),
                    second: dotted(&pair[1]),
                });
            }
        }
        match chains.pop() {
            Some(chain) if !chain.is_empty() => Ok(chain
                .into_iter()
                .fold(root.clone(), |target, member| target.member(member))),
            _ => Err(MappingError::MemberIsChildOfParameter {
                path: built.to_string(),
                ty: param.ty.clone(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Appels de méthodes
    // -------------------------------------------------------------------------

    fn visit_call(&mut self, receiver: Option<&Expr>, method: &MethodRef, args: &[Expr]) -> Result<Expr, MappingError> {
        let receiver = receiver.map(|r| self.visit(r)).transpose()?;
        let args = args.iter().map(|a| self.visit(a)).collect::<Result<Vec<_>, _>>()?;

        let mut type_args: Vec<TypeRef> = method.type_args.iter().map(|t| self.types.substitute(t)).collect();
        for binding in &method.def.selector_bindings {
            if let (Some(Expr::Lambda(selector)), Some(slot)) = (args.get(binding.arg), type_args.get_mut(binding.generic)) {
                *slot = selector.body.ty();
            }
        }
        let candidate = MethodRef {
            def: method.def.clone(),
            type_args,
        };

        let (method, args) = match self.fit_arguments(&candidate, &args) {
            Ok(fitted) => (candidate, fitted),
            Err(mismatch) => {
                // dernière chance : inférer à nouveau depuis les arguments réécrits
                let schema = self.registry.schema();
                let inferred = instantiate(schema, method.def.clone(), receiver.as_ref(), &args).map_err(|_| mismatch)?;
                let fitted = self.fit_arguments(&inferred, &args)?;
                (inferred, fitted)
            }
        };
        Ok(Expr::Call {
            receiver: receiver.map(Box::new),
            method,
            args,
        })
    }

    fn fit_arguments(&self, method: &MethodRef, args: &[Expr]) -> Result<Vec<Expr>, MappingError> {
        let schema = self.registry.schema();
        method
            .param_types()
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (expected, arg))| {
                let found = arg.ty();
                if found == *expected {
                    Ok(arg.clone())
                } else if schema.is_assignable(&found, expected) {
                    if found.is_value_type() || expected.is_value_type() {
                        Ok(arg.clone().convert(expected.clone()))
                    } else {
                        Ok(arg.clone())
                    }
                } else {
                    Err(MappingError::ArgumentTypeMismatch {
                        method: method.to_string(),
                        index,
                        expected: expected.clone(),
                        found,
                    })
                }
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Unaires, constantes, binaires
    // -------------------------------------------------------------------------

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr, ty: &TypeRef) -> Result<Expr, MappingError> {
        if op == UnaryOp::Convert {
            if let Expr::Constant { value, ty: from } = operand {
                let to = self.types.substitute(from);
                if to != *from && self.registry.has_mapping(from, &to) {
                    let converted = self.registry.convert(value, from, &to)?;
                    return Ok(Expr::typed_constant(converted, self.types.substitute(ty)));
                }
            }
        }
        let operand = self.visit(operand)?;
        match op {
            UnaryOp::Convert => {
                let target = self.types.substitute(ty);
                if operand.ty() == target {
                    Ok(operand)
                } else {
                    Ok(operand.convert(target))
                }
            }
            UnaryOp::Not => Ok(operand.logical_not()),
            UnaryOp::Negate => Ok(operand.negate()),
        }
    }

    fn visit_constant(&mut self, value: &Value, ty: &TypeRef) -> Result<Expr, MappingError> {
        let target = self.types.substitute(ty);
        if target == *ty {
            return Ok(Expr::typed_constant(value.clone(), ty.clone()));
        }
        if value.is_null() {
            return Ok(Expr::null(target));
        }
        match self.registry.convert(value, ty, &target) {
            Ok(converted) => Ok(Expr::typed_constant(converted, target)),
            Err(MappingError::MissingTypeMapping { .. }) => Ok(Expr::typed_constant(value.clone(), ty.clone())),
            Err(e) => Err(e),
        }
    }

    fn visit_binary(&mut self, op: super::expr::BinaryOp, left: &Expr, right: &Expr) -> Result<Expr, MappingError> {
        let mut l = self.visit(left)?;
        let mut r = self.visit(right)?;
        match (is_null(&l), is_null(&r)) {
            (true, false) => l = Expr::null(r.ty()),
            (false, true) => r = Expr::null(l.ty()),
            _ => {}
        }

        let (lt, rt) = (l.ty(), r.ty());
        if lt == rt || op.is_logical() {
            return Ok(Expr::binary(op, l, r));
        }
        if let Some(converted) = self.convert_constant(&r, &lt)? {
            return Ok(Expr::binary(op, l, converted));
        }
        if let Some(converted) = self.convert_constant(&l, &rt)? {
            return Ok(Expr::binary(op, converted, r));
        }
        let schema = self.registry.schema();
        if schema.is_assignable(&lt, &rt) {
            Ok(Expr::binary(op, l.convert(rt), r))
        } else if schema.is_assignable(&rt, &lt) {
            Ok(Expr::binary(op, l, r.convert(lt)))
        } else {
            Err(MappingError::BinaryTypeMismatch {
                op: op.to_string(),
                left: lt,
                right: rt,
            })
        }
    }

    /// Convertit une constante vers `to` si un TypeMapping existe.
    fn convert_constant(&self, expr: &Expr, to: &TypeRef) -> Result<Option<Expr>, MappingError> {
        match expr {
            Expr::Constant { value, ty } if !value.is_null() && self.registry.has_mapping(ty, to) => {
                let converted = self.registry.convert(value, ty, to)?;
                Ok(Some(Expr::typed_constant(converted, to.clone())))
            }
            _ => Ok(None),
        }
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(expr, Expr::Constant { value: Value::Null, .. })
}

fn dotted(chain: &[super::schema::Member]) -> String {
    chain.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(".")
}

/// Réécrit `expression` (une lambda) vers le type fonctionnel `target`.
pub(crate) fn map_expression(
    registry: &Registry,
    expression: &Expr,
    target: &TypeRef,
    include: bool,
) -> Result<Lambda, MappingError> {
    let Expr::Lambda(lambda) = expression else {
        return Err(MappingError::NotExpressionShaped { found: expression.ty() });
    };
    let Some((target_params, target_ret)) = target.as_func() else {
        return Err(MappingError::NotExpressionShaped { found: target.clone() });
    };
    let wanted = TypeRef::func(target_params.to_vec(), target_ret.clone());
    if lambda.params.len() != target_params.len() {
        return Err(MappingError::InvalidArgumentCount {
            from: lambda.func_type(),
            to: wanted,
        });
    }

    let mut types = TypeSubstitution::default();
    types.seed(&lambda.func_type(), &wanted)?;
    let mut mapper = ExpressionMapper::new(registry, types, include);
    for (param, ty) in lambda.params.iter().zip(target_params) {
        mapper.bind_parameter(param, ty.clone());
    }

    let mapped = mapper.visit_lambda(lambda)?;
    let body = fit_return(registry, *mapped.body, target_ret)?;
    let result = Lambda::new(mapped.params, body);
    debug!(from = %lambda, to = %result, include, "expression réécrite");
    Ok(result)
}

/// Ajuste le corps au type de retour demandé.
fn fit_return(registry: &Registry, body: Expr, ret: &TypeRef) -> Result<Expr, MappingError> {
    let found = body.ty();
    if found == *ret {
        return Ok(body);
    }
    if *ret == TypeRef::Object {
        return Ok(if found.is_value_type() { body.convert(TypeRef::Object) } else { body });
    }
    if registry.schema().is_assignable(&found, ret) {
        Ok(body.convert(ret.clone()))
    } else {
        Err(MappingError::CannotRemap {
            reason: format!("le corps est de type {}, {} attendu", found, ret),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::BinaryOp;
    use crate::core::instance::ObjectValue;
    use crate::core::mapping::ValueConverter;
    use crate::core::query;
    use crate::core::registry::RegistryBuilder;
    use crate::core::schema::Schema;

    /// Customer { Id, Name } ; Order { Id, Total : Float, Customer }
    /// OrderDto { Id, Total : Float, CustomerName, CustomerId }
    fn schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Customer")
         .add_type("Order")
         .add_type("OrderDto")
         .add_key("Customer", "Id", TypeRef::int())
         .add_member("Customer", "Name", TypeRef::string())
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Total", TypeRef::float())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_key("OrderDto", "Id", TypeRef::int())
         .add_member("OrderDto", "Total", TypeRef::float())
         .add_member("OrderDto", "CustomerName", TypeRef::string())
         .add_member("OrderDto", "CustomerId", TypeRef::int());
        s
    }

    fn order() -> TypeRef {
        TypeRef::shape("Order")
    }

    fn dto() -> TypeRef {
        TypeRef::shape("OrderDto")
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new(schema());
        builder.create_mapping(order(), dto()).reverse_map();
        builder.seal().unwrap()
    }

    fn predicate(ty: TypeRef) -> TypeRef {
        TypeRef::expression(vec![ty], TypeRef::boolean())
    }

    #[test]
    fn test_seed_pairs_generic_arguments() {
        let mut types = TypeSubstitution::default();
        types
            .seed(&TypeRef::queryable(dto()), &TypeRef::queryable(order()))
            .unwrap();
        assert_eq!(types.substitute(&TypeRef::list(dto())), TypeRef::list(order()));
        assert_eq!(types.substitute(&TypeRef::int()), TypeRef::int());
    }

    #[test]
    fn test_seed_rejects_arity_mismatch() {
        let mut types = TypeSubstitution::default();
        let err = types
            .seed(
                &TypeRef::func(vec![dto()], TypeRef::boolean()),
                &TypeRef::func(vec![order(), order()], TypeRef::boolean()),
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::InvalidArgumentCount { .. }));
    }

    #[test]
    fn test_flattened_predicate() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "CustomerName").unwrap().equal(Expr::constant("Alice")),
        );
        let mapped = r.map_expression(&expr, &predicate(order())).unwrap();
        assert_eq!(mapped.to_string(), "d => (d.Customer.Name == \"Alice\")");
        assert_eq!(mapped.params[0].ty, order());
        assert_eq!(mapped.params[0].id, d.id.derive());
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "CustomerId").unwrap().greater_than(Expr::constant(3i64)),
        );
        let a = r.map_expression(&expr, &predicate(order())).unwrap();
        let b = r.map_expression(&expr, &predicate(order())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_lambda_and_wrong_arity() {
        let r = registry();
        let err = r.map_expression(&Expr::constant(1i64), &predicate(order())).unwrap_err();
        assert!(matches!(err, MappingError::NotExpressionShaped { .. }));

        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(vec![d], Expr::constant(true));
        let target = TypeRef::expression(vec![order(), order()], TypeRef::boolean());
        let err = r.map_expression(&expr, &target).unwrap_err();
        assert!(matches!(err, MappingError::InvalidArgumentCount { .. }));
    }

    #[test]
    fn test_order_by_key_follows_selector() {
        let mut builder = RegistryBuilder::new(schema());
        let conv = ValueConverter::new(TypeRef::string(), TypeRef::int(), |v| match v {
            Value::String(s) => Ok(Value::Integer(s.len() as i64)),
            other => Ok(other.clone()),
        });
        let c = Parameter::new("o", order());
        let name = Lambda::new(vec![c.clone()], Expr::param(&c).access(&schema(), "Customer.Name").unwrap());
        builder
            .create_mapping(order(), dto())
            .map_from("CustomerId", name)
            .convert_member("CustomerId", conv);
        let r = builder.seal().unwrap();
        let s = r.schema();

        let q = Parameter::new("q", TypeRef::queryable(dto()));
        let d = Parameter::new("d", dto());
        let key = Lambda::new(vec![d.clone()], Expr::param(&d).access(s, "CustomerId").unwrap());
        let body = query::order_by(s, Expr::param(&q), key).unwrap();
        let expr = Expr::lambda(vec![q], body);
        let target = TypeRef::expression(
            vec![TypeRef::queryable(order())],
            TypeRef::ordered_queryable(order()),
        );
        let mapped = r.map_expression(&expr, &target).unwrap();
        let Expr::Call { method, .. } = mapped.body.as_ref() else {
            panic!("appel attendu");
        };
        assert_eq!(method.type_args, vec![order(), TypeRef::string()]);
    }

    #[test]
    fn test_constant_object_is_converted() {
        let r = registry();
        let d = Parameter::new("d", dto());
        let value = Value::Object(ObjectValue::new("OrderDto").with("Id", 7i64));
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::binary(BinaryOp::Eq, Expr::param(&d), Expr::typed_constant(value, dto())),
        );
        let mapped = r.map_expression(&expr, &predicate(order())).unwrap();
        let Expr::Binary { right, .. } = mapped.body.as_ref() else {
            panic!("binaire attendu");
        };
        let Expr::Constant { value, ty } = right.as_ref() else {
            panic!("constante attendue");
        };
        assert_eq!(*ty, order());
        assert_eq!(value.as_object().map(|o| o.get("Id").clone()), Some(Value::Integer(7)));
    }

    #[test]
    fn test_null_is_retyped() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "CustomerName").unwrap().not_equal(Expr::null(TypeRef::Object)),
        );
        let mapped = r.map_expression(&expr, &predicate(order())).unwrap();
        let Expr::Binary { right, .. } = mapped.body.as_ref() else {
            panic!("binaire attendu");
        };
        assert_eq!(right.ty(), TypeRef::string());
    }

    #[test]
    fn test_binary_widening_and_mismatch() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let nullable = Parameter::new("n", TypeRef::nullable(TypeRef::int()));
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "Id").unwrap().equal(Expr::param(&nullable)),
        );
        let mapped = r.map_expression(&expr, &predicate(order())).unwrap();
        assert!(mapped.to_string().contains("Convert(d.Id"));

        let bad = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "Id").unwrap().equal(Expr::constant("x")),
        );
        let err = r.map_expression(&bad, &predicate(order())).unwrap_err();
        assert!(matches!(err, MappingError::BinaryTypeMismatch { .. }));
    }

    #[test]
    fn test_return_type_fitting() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(vec![d.clone()], Expr::param(&d).access(s, "Id").unwrap());

        let boxed = r.map_expression(&expr, &TypeRef::expression(vec![order()], TypeRef::Object)).unwrap();
        assert!(matches!(boxed.body.as_ref(), Expr::Unary { op: UnaryOp::Convert, .. }));

        let err = r
            .map_expression(&expr, &TypeRef::expression(vec![order()], TypeRef::string()))
            .unwrap_err();
        assert!(matches!(err, MappingError::CannotRemap { .. }));
    }

    #[test]
    fn test_include_trims_literal_leaf() {
        let r = registry();
        let s = r.schema();
        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(vec![d.clone()], Expr::param(&d).access(s, "CustomerName").unwrap());
        let target = TypeRef::expression(vec![order()], TypeRef::Object);
        let mapped = r.map_include(&expr, &target).unwrap();
        assert_eq!(mapped.to_string(), "d => d.Customer");

        let direct = Expr::lambda(vec![d.clone()], Expr::param(&d).access(s, "Id").unwrap());
        let err = r.map_include(&direct, &target).unwrap_err();
        assert!(matches!(err, MappingError::MemberIsChildOfParameter { .. }));
    }

    #[test]
    fn test_convert_of_mapped_constant_becomes_constant() {
        let r = registry();
        let d = Parameter::new("d", dto());
        let value = Value::Object(ObjectValue::new("OrderDto").with("Id", 3i64));
        let target = TypeRef::expression(vec![order()], TypeRef::Object);

        // Convert(OrderDto, OrderDto) : la cible devient Order, l'identité disparaît
        let same = Expr::lambda(
            vec![d.clone()],
            Expr::typed_constant(value.clone(), dto()).convert(dto()),
        );
        let mapped = r.map_expression(&same, &target).unwrap();
        let Expr::Constant { value: converted, ty } = mapped.body.as_ref() else {
            panic!("constante attendue");
        };
        assert_eq!(*ty, order());
        let object = converted.as_object().unwrap();
        assert_eq!(object.type_name, "Order");
        assert_eq!(object.get("Id"), &Value::Integer(3));

        // Convert(OrderDto, Object) : la valeur est convertie, le type reste Object
        let boxed = Expr::lambda(vec![d.clone()], Expr::typed_constant(value, dto()).convert(TypeRef::Object));
        let mapped = r.map_expression(&boxed, &target).unwrap();
        let Expr::Constant { value: converted, ty } = mapped.body.as_ref() else {
            panic!("constante attendue");
        };
        assert_eq!(*ty, TypeRef::Object);
        assert_eq!(converted.as_object().map(|o| o.type_name.as_str()), Some("Order"));
    }

    #[test]
    fn test_custom_expression_wins_over_chain() {
        let mut s = schema();
        s.add_member("Customer", "Nick", TypeRef::string());
        let o = Parameter::new("o", order());
        let nick = Lambda::new(vec![o.clone()], Expr::param(&o).access(&s, "Customer.Nick").unwrap());
        let mut builder = RegistryBuilder::new(s);
        builder
            .create_mapping(order(), dto())
            .map_member_and_from("CustomerName", "Customer.Name", nick)
            .reverse_map();
        let r = builder.seal().unwrap();
        let s = r.schema();

        let d = Parameter::new("d", dto());
        let expr = Expr::lambda(
            vec![d.clone()],
            Expr::param(&d).access(s, "CustomerName").unwrap().equal(Expr::constant("a")),
        );
        let mapped = r.map_expression(&expr, &predicate(order())).unwrap();
        assert_eq!(mapped.to_string(), "d => (d.Customer.Nick == \"a\")");

        // Le miroir suit l'expression, pas la chaîne documentaire
        let mirror = r.get_mapping(&dto(), &order()).unwrap();
        let paths: Vec<String> = mirror.path_rules.iter().map(|p| p.dotted()).collect();
        assert!(paths.iter().any(|p| p == "Customer.Nick"));
        assert!(!paths.iter().any(|p| p == "Customer.Name"));
    }
}
