// =============================================================================
// EXPR — L'arbre d'expressions (AST fermé)
// =============================================================================
//
// Une requête déclarative est un ARBRE, pas du code : c'est ce qui permet
// de la réécrire d'un type vers un autre puis de la pousser à un backend.
//
//   o => o.Customer.Name == "Alice"
//
//   Lambda(o : Order)
//     └── Binary(==)
//           ├── Member(Name)
//           │     └── Member(Customer)
//           │           └── Parameter(o)
//           └── Constant("Alice" : String)
//
// Sept sortes de nœuds, pas une de plus :
//   Parameter, Member, Call, Unary, Constant, Binary, Lambda
//
// Chaque nœud connaît son type statique (`ty()`), ce qui permet au
// réécrivain de vérifier les arguments et de reconstruire les types
// fonctionnels après coup.
//
// IDENTITÉ DES PARAMÈTRES : deux paramètres de même nom sont différents
// s'ils n'ont pas le même ParamId. Le réécrivain dérive l'identité d'un
// nouveau paramètre de l'ancienne de façon DÉTERMINISTE : réécrire deux
// fois le même arbre donne deux arbres égaux.
//
// =============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::query::MethodDef;
use super::schema::{Member, Schema};
use super::typeside::{BaseType, TypeRef, Value};
use crate::error::MappingError;

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identité d'un paramètre de lambda.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    /// Une identité neuve, unique dans le processus
    pub fn fresh() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// L'identité du paramètre réécrit à partir de celui-ci.
    /// Le bit de poids fort sépare les identités dérivées des neuves.
    pub fn derive(self) -> Self {
        ParamId(splitmix64(self.0) | (1 << 63))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Un paramètre de lambda.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub id: ParamId,
    pub name: String,
    pub ty: TypeRef,
}

impl Parameter {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Parameter {
            id: ParamId::fresh(),
            name: name.to_string(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Convert,
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    AndAlso,
    OrElse,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Opérateurs dont le résultat est booléen
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Lte | BinaryOp::Gte
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Lte => "<=",
            BinaryOp::Gte => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Une méthode instanciée : sa définition + ses arguments génériques.
#[derive(Debug, Clone)]
pub struct MethodRef {
    pub def: Arc<MethodDef>,
    pub type_args: Vec<TypeRef>,
}

impl MethodRef {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Types des paramètres, arguments génériques substitués
    pub fn param_types(&self) -> Vec<TypeRef> {
        let bindings = self.def.bindings(&self.type_args);
        self.def.params.iter().map(|p| p.bind_params(&bindings)).collect()
    }

    /// Type du receveur (méthodes d'instance)
    pub fn receiver_type(&self) -> Option<TypeRef> {
        let bindings = self.def.bindings(&self.type_args);
        self.def.receiver.as_ref().map(|r| r.bind_params(&bindings))
    }

    pub fn return_type(&self) -> TypeRef {
        let bindings = self.def.bindings(&self.type_args);
        self.def.ret.bind_params(&bindings)
    }
}

impl PartialEq for MethodRef {
    fn eq(&self, other: &Self) -> bool {
        self.def.declaring == other.def.declaring
            && self.def.name == other.def.name
            && self.type_args == other.type_args
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_args.is_empty() {
            write!(f, "{}", self.def.name)
        } else {
            let args: Vec<String> = self.type_args.iter().map(|t| t.to_string()).collect();
            write!(f, "{}<{}>", self.def.name, args.join(", "))
        }
    }
}

/// Une lambda : paramètres + corps. Son type fonctionnel est DÉRIVÉ.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<Parameter>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(params: Vec<Parameter>, body: Expr) -> Self {
        Lambda {
            params,
            body: Box::new(body),
        }
    }

    /// Func<P.., R>
    pub fn func_type(&self) -> TypeRef {
        TypeRef::func(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.body.ty(),
        )
    }

    /// Expression<Func<P.., R>>
    pub fn expression_type(&self) -> TypeRef {
        TypeRef::Expression(Box::new(self.func_type()))
    }

    /// Le corps est-il une simple chaîne de membres sur le premier paramètre ?
    /// Retourne la chaîne (éventuellement vide pour `x => x`).
    pub fn as_member_chain(&self) -> Option<Vec<Member>> {
        let param = self.params.first()?;
        let (root, members) = self.body.member_chain();
        match root {
            Expr::Parameter(p) if p.id == param.id && self.params.len() == 1 => {
                Some(members.into_iter().cloned().collect())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params.as_slice() {
            [p] => write!(f, "{} => {}", p.name, self.body),
            params => {
                let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                write!(f, "({}) => {}", names.join(", "), self.body)
            }
        }
    }
}

/// Un nœud d'expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Parameter(Parameter),
    Member {
        target: Box<Expr>,
        member: Member,
    },
    /// Appel de méthode. `receiver` vaut None pour les méthodes statiques
    /// (opérateurs de requête : la séquence est le premier argument).
    Call {
        receiver: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: TypeRef,
    },
    Constant {
        value: Value,
        ty: TypeRef,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Lambda(Lambda),
}

impl Expr {
    /// Le type statique du nœud
    pub fn ty(&self) -> TypeRef {
        match self {
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Member { member, .. } => member.ty.clone(),
            Expr::Call { method, .. } => method.return_type(),
            Expr::Unary { ty, .. } => ty.clone(),
            Expr::Constant { ty, .. } => ty.clone(),
            Expr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    TypeRef::boolean()
                } else {
                    let l = left.ty();
                    if *op == BinaryOp::Add && (l == TypeRef::string() || right.ty() == TypeRef::string()) {
                        TypeRef::string()
                    } else {
                        l
                    }
                }
            }
            Expr::Lambda(l) => l.func_type(),
        }
    }

    pub fn param(p: &Parameter) -> Self {
        Expr::Parameter(p.clone())
    }

    /// Constante typée d'après sa valeur (Null est typé Object)
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.runtime_type().unwrap_or(TypeRef::Object);
        Expr::Constant { value, ty }
    }

    pub fn typed_constant(value: Value, ty: TypeRef) -> Self {
        Expr::Constant { value, ty }
    }

    pub fn null(ty: TypeRef) -> Self {
        Expr::Constant {
            value: Value::Null,
            ty,
        }
    }

    pub fn member(self, member: Member) -> Self {
        Expr::Member {
            target: Box::new(self),
            member,
        }
    }

    /// Accès pointé résolu dans le schéma : `o.access(schema, "Customer.Name")`
    pub fn access(self, schema: &Schema, dotted: &str) -> Result<Self, MappingError> {
        let mut current = self;
        for segment in dotted.split('.').filter(|s| !s.is_empty()) {
            let ty = current.ty();
            let member = schema
                .find_member(&ty, segment)
                .cloned()
                .ok_or_else(|| MappingError::MissingMember {
                    ty: ty.clone(),
                    member: segment.to_string(),
                })?;
            current = current.member(member);
        }
        Ok(current)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Eq, self, other)
    }

    pub fn not_equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Neq, self, other)
    }

    pub fn less_than(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Lt, self, other)
    }

    pub fn greater_than(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Gt, self, other)
    }

    pub fn less_or_equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Lte, self, other)
    }

    pub fn greater_or_equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Gte, self, other)
    }

    pub fn and_also(self, other: Expr) -> Self {
        Self::binary(BinaryOp::AndAlso, self, other)
    }

    pub fn or_else(self, other: Expr) -> Self {
        Self::binary(BinaryOp::OrElse, self, other)
    }

    pub fn plus(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Add, self, other)
    }

    pub fn convert(self, ty: TypeRef) -> Self {
        Expr::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(self),
            ty,
        }
    }

    pub fn logical_not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
            ty: TypeRef::boolean(),
        }
    }

    pub fn negate(self) -> Self {
        let ty = self.ty();
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
            ty,
        }
    }

    pub fn lambda(params: Vec<Parameter>, body: Expr) -> Self {
        Expr::Lambda(Lambda::new(params, body))
    }

    /// Descend les accès membres jusqu'à la racine.
    /// Retourne (racine, membres depuis la racine vers l'extérieur).
    pub fn member_chain(&self) -> (&Expr, Vec<&Member>) {
        let mut members = Vec::new();
        let mut current = self;
        while let Expr::Member { target, member } = current {
            members.push(member);
            current = target;
        }
        members.reverse();
        (current, members)
    }

    /// Remplace toutes les occurrences du paramètre `id` par `replacement`
    pub fn substitute(&self, id: ParamId, replacement: &Expr) -> Expr {
        match self {
            Expr::Parameter(p) if p.id == id => replacement.clone(),
            Expr::Parameter(_) | Expr::Constant { .. } => self.clone(),
            Expr::Member { target, member } => Expr::Member {
                target: Box::new(target.substitute(id, replacement)),
                member: member.clone(),
            },
            Expr::Call { receiver, method, args } => Expr::Call {
                receiver: receiver
                    .as_ref()
                    .map(|r| Box::new(r.substitute(id, replacement))),
                method: method.clone(),
                args: args.iter().map(|a| a.substitute(id, replacement)).collect(),
            },
            Expr::Unary { op, operand, ty } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.substitute(id, replacement)),
                ty: ty.clone(),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.substitute(id, replacement)),
                right: Box::new(right.substitute(id, replacement)),
            },
            Expr::Lambda(l) => Expr::Lambda(Lambda {
                params: l.params.clone(),
                body: Box::new(l.body.substitute(id, replacement)),
            }),
        }
    }

    /// Collecte les chaînes de membres maximales enracinées sur le
    /// paramètre `id` (ex: `d.Customer.Name` → [Customer, Name]).
    pub fn member_chains_on(&self, id: ParamId) -> Vec<Vec<Member>> {
        let mut out = Vec::new();
        self.collect_chains(id, &mut out);
        out
    }

    fn collect_chains(&self, id: ParamId, out: &mut Vec<Vec<Member>>) {
        match self {
            Expr::Member { .. } => {
                let (root, members) = self.member_chain();
                match root {
                    Expr::Parameter(p) if p.id == id => {
                        out.push(members.into_iter().cloned().collect());
                    }
                    other => other.collect_chains(id, out),
                }
            }
            Expr::Parameter(_) | Expr::Constant { .. } => {}
            Expr::Call { receiver, args, .. } => {
                if let Some(r) = receiver {
                    r.collect_chains(id, out);
                }
                for a in args {
                    a.collect_chains(id, out);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_chains(id, out),
            Expr::Binary { left, right, .. } => {
                left.collect_chains(id, out);
                right.collect_chains(id, out);
            }
            Expr::Lambda(l) => l.body.collect_chains(id, out),
        }
    }

    /// Le paramètre `id` apparaît-il dans l'arbre ?
    pub fn references(&self, id: ParamId) -> bool {
        match self {
            Expr::Parameter(p) => p.id == id,
            Expr::Constant { .. } => false,
            Expr::Member { target, .. } => target.references(id),
            Expr::Call { receiver, args, .. } => {
                receiver.as_ref().is_some_and(|r| r.references(id))
                    || args.iter().any(|a| a.references(id))
            }
            Expr::Unary { operand, .. } => operand.references(id),
            Expr::Binary { left, right, .. } => left.references(id) || right.references(id),
            Expr::Lambda(l) => l.body.references(id),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::Member { target, member } => write!(f, "{}.{}", target, member.name),
            Expr::Call { receiver, method, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                match receiver {
                    Some(r) => write!(f, "{}.{}({})", r, method, rendered.join(", ")),
                    None => match rendered.split_first() {
                        Some((first, rest)) => write!(f, "{}.{}({})", first, method, rest.join(", ")),
                        None => write!(f, "{}()", method),
                    },
                }
            }
            Expr::Unary { op, operand, ty } => match op {
                UnaryOp::Convert => write!(f, "Convert({}, {})", operand, ty),
                UnaryOp::Not => write!(f, "!({})", operand),
                UnaryOp::Negate => write!(f, "-({})", operand),
            },
            Expr::Constant { value, ty } => match (value, ty) {
                (Value::Null, _) => write!(f, "null"),
                (_, TypeRef::Base(BaseType::Custom(name))) => write!(f, "{}({})", name, value),
                _ => write!(f, "{}", value),
            },
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Lambda(l) => write!(f, "{}", l),
        }
    }
}
