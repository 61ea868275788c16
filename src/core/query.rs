// =============================================================================
// QUERY — Le catalogue des méthodes connues (opérateurs de requête)
// =============================================================================
//
// Une requête s'écrit comme une chaîne d'appels sur une séquence :
//
//   orders.Where(o => o.Total > 100)
//         .OrderBy(o => o.Customer.Name)
//         .ThenByDescending(o => o.Id)
//
// Chaque appel référence une MethodDef : une signature GÉNÉRIQUE
// (paramètres T, TKey, TResult...) que l'on instancie en inférant les
// arguments génériques à partir des types des arguments.
//
//   OrderBy<T, TKey>(Queryable<T>, Expression<Func<T, TKey>>) → OrderedQueryable<T>
//
// Le point délicat pour la réécriture : quand le sélecteur change de type
// de retour (Int → String), l'argument générique TKey doit SUIVRE. C'est
// ce que déclarent les `selector_bindings` : "l'argument générique n° g
// est le type de retour de la lambda passée en argument n° a".
//
// Familles de méthodes :
//   Queryable  → opérateurs sur une requête (Where, OrderBy, Select...)
//   Enumerable → opérateurs sur une collection membre (o.Lines.Any(..))
//   String     → méthodes d'instance (Contains, StartsWith, ToUpper...)
//
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use super::expr::{Expr, Lambda, MethodRef};
use super::schema::{generic_family, Schema};
use super::typeside::TypeRef;
use crate::error::MappingError;

pub const QUERYABLE: &str = "Queryable";
pub const ENUMERABLE: &str = "Enumerable";
pub const STRING: &str = "String";

/// "L'argument générique `generic` est le type de retour du sélecteur
/// passé en argument `arg`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorBinding {
    pub generic: usize,
    pub arg: usize,
}

/// Signature générique d'une méthode.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    /// Famille déclarante : Queryable, Enumerable, String
    pub declaring: String,
    pub generic_params: Vec<String>,
    /// Type du receveur pour une méthode d'instance, None pour une statique
    pub receiver: Option<TypeRef>,
    pub params: Vec<TypeRef>,
    pub ret: TypeRef,
    pub selector_bindings: Vec<SelectorBinding>,
}

impl MethodDef {
    /// Associe chaque paramètre générique à son argument
    pub fn bindings(&self, type_args: &[TypeRef]) -> BTreeMap<String, TypeRef> {
        self.generic_params
            .iter()
            .cloned()
            .zip(type_args.iter().cloned())
            .collect()
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

/// Petit builder interne pour écrire le catalogue lisiblement
struct Sig {
    def: MethodDef,
}

impl Sig {
    fn stat(declaring: &str, name: &str, generics: &[&str]) -> Self {
        Sig {
            def: MethodDef {
                name: name.to_string(),
                declaring: declaring.to_string(),
                generic_params: generics.iter().map(|g| g.to_string()).collect(),
                receiver: None,
                params: Vec::new(),
                ret: TypeRef::Object,
                selector_bindings: Vec::new(),
            },
        }
    }

    fn instance(declaring: &str, name: &str, receiver: TypeRef) -> Self {
        let mut s = Sig::stat(declaring, name, &[]);
        s.def.receiver = Some(receiver);
        s
    }

    fn params(mut self, params: Vec<TypeRef>) -> Self {
        self.def.params = params;
        self
    }

    fn returns(mut self, ret: TypeRef) -> Self {
        self.def.ret = ret;
        self
    }

    fn selector(mut self, generic: usize, arg: usize) -> Self {
        self.def.selector_bindings.push(SelectorBinding { generic, arg });
        self
    }
}

/// Le catalogue : (famille, nom, nombre de paramètres) → signature
pub struct Catalog {
    methods: HashMap<(String, String, usize), Arc<MethodDef>>,
}

impl Catalog {
    fn build() -> Self {
        let t = || TypeRef::param("T");
        let k = || TypeRef::param("TKey");
        let r = || TypeRef::param("TResult");
        let q = |x: TypeRef| TypeRef::queryable(x);
        let e = |x: TypeRef| TypeRef::enumerable(x);
        let pred = |x: TypeRef| TypeRef::expression(vec![x], TypeRef::boolean());
        let sel = |x: TypeRef, y: TypeRef| TypeRef::expression(vec![x], y);
        let fpred = |x: TypeRef| TypeRef::func(vec![x], TypeRef::boolean());

        let mut sigs = vec![
            // --- Queryable ---
            Sig::stat(QUERYABLE, "Where", &["T"])
                .params(vec![q(t()), pred(t())])
                .returns(q(t())),
            Sig::stat(QUERYABLE, "Select", &["T", "TResult"])
                .params(vec![q(t()), sel(t(), r())])
                .returns(q(r()))
                .selector(1, 1),
            Sig::stat(QUERYABLE, "Any", &["T"])
                .params(vec![q(t())])
                .returns(TypeRef::boolean()),
            Sig::stat(QUERYABLE, "Any", &["T"])
                .params(vec![q(t()), pred(t())])
                .returns(TypeRef::boolean()),
            Sig::stat(QUERYABLE, "Count", &["T"])
                .params(vec![q(t())])
                .returns(TypeRef::int()),
            Sig::stat(QUERYABLE, "First", &["T"])
                .params(vec![q(t())])
                .returns(t()),
            Sig::stat(QUERYABLE, "FirstOrDefault", &["T"])
                .params(vec![q(t())])
                .returns(t()),
            Sig::stat(QUERYABLE, "Take", &["T"])
                .params(vec![q(t()), TypeRef::int()])
                .returns(q(t())),
            Sig::stat(QUERYABLE, "Skip", &["T"])
                .params(vec![q(t()), TypeRef::int()])
                .returns(q(t())),
            // --- Enumerable ---
            Sig::stat(ENUMERABLE, "Any", &["T"])
                .params(vec![e(t())])
                .returns(TypeRef::boolean()),
            Sig::stat(ENUMERABLE, "Any", &["T"])
                .params(vec![e(t()), fpred(t())])
                .returns(TypeRef::boolean()),
            Sig::stat(ENUMERABLE, "Count", &["T"])
                .params(vec![e(t())])
                .returns(TypeRef::int()),
            Sig::stat(ENUMERABLE, "Contains", &["T"])
                .params(vec![e(t()), t()])
                .returns(TypeRef::boolean()),
            Sig::stat(ENUMERABLE, "Select", &["T", "TResult"])
                .params(vec![e(t()), TypeRef::func(vec![t()], r())])
                .returns(e(r()))
                .selector(1, 1),
            // --- String ---
            Sig::instance(STRING, "Contains", TypeRef::string())
                .params(vec![TypeRef::string()])
                .returns(TypeRef::boolean()),
            Sig::instance(STRING, "StartsWith", TypeRef::string())
                .params(vec![TypeRef::string()])
                .returns(TypeRef::boolean()),
            Sig::instance(STRING, "EndsWith", TypeRef::string())
                .params(vec![TypeRef::string()])
                .returns(TypeRef::boolean()),
            Sig::instance(STRING, "ToUpper", TypeRef::string()).returns(TypeRef::string()),
            Sig::instance(STRING, "ToLower", TypeRef::string()).returns(TypeRef::string()),
            Sig::instance(STRING, "Trim", TypeRef::string()).returns(TypeRef::string()),
        ];

        // Tris : la clé TKey suit le type de retour du sélecteur
        for (name, source) in [
            ("OrderBy", q(t())),
            ("OrderByDescending", q(t())),
            ("ThenBy", TypeRef::ordered_queryable(t())),
            ("ThenByDescending", TypeRef::ordered_queryable(t())),
        ] {
            sigs.push(
                Sig::stat(QUERYABLE, name, &["T", "TKey"])
                    .params(vec![source, sel(t(), k())])
                    .returns(TypeRef::ordered_queryable(t()))
                    .selector(1, 1),
            );
        }

        let methods = sigs
            .into_iter()
            .map(|s| {
                let key = (s.def.declaring.clone(), s.def.name.clone(), s.def.params.len());
                (key, Arc::new(s.def))
            })
            .collect();
        Catalog { methods }
    }

    /// Le catalogue global, construit une fois
    pub fn global() -> &'static Catalog {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(Catalog::build)
    }

    pub fn lookup(&self, declaring: &str, name: &str, arity: usize) -> Option<Arc<MethodDef>> {
        self.methods
            .get(&(declaring.to_string(), name.to_string(), arity))
            .cloned()
    }
}

/// Unifie un type-patron avec un type réel et enregistre les liaisons
/// des paramètres génériques. La première liaison trouvée gagne.
fn unify(template: &TypeRef, actual: &TypeRef, bindings: &mut BTreeMap<String, TypeRef>) {
    match (template, actual) {
        (TypeRef::Param(name), _) => {
            bindings.entry(name.clone()).or_insert_with(|| actual.clone());
        }
        (
            TypeRef::Generic { name: tname, args: targs },
            TypeRef::Generic { name: aname, args: aargs },
        ) => {
            if targs.len() == aargs.len() && generic_family(aname).contains(&tname.as_str()) {
                for (t, a) in targs.iter().zip(aargs) {
                    unify(t, a, bindings);
                }
            }
        }
        (TypeRef::Expression(t), TypeRef::Expression(a)) => unify(t, a, bindings),
        (TypeRef::Expression(t), TypeRef::Func { .. }) => unify(t, actual, bindings),
        (TypeRef::Func { params: tp, ret: tr }, TypeRef::Func { params: ap, ret: ar }) => {
            for (t, a) in tp.iter().zip(ap) {
                unify(t, a, bindings);
            }
            unify(tr, ar, bindings);
        }
        _ => {}
    }
}

/// Instancie une méthode générique à partir de ses arguments réels
/// et vérifie que chaque argument est assignable.
pub fn instantiate(
    schema: &Schema,
    def: Arc<MethodDef>,
    receiver: Option<&Expr>,
    args: &[Expr],
) -> Result<MethodRef, MappingError> {
    let mut bindings = BTreeMap::new();
    if let (Some(template), Some(recv)) = (&def.receiver, receiver) {
        unify(template, &recv.ty(), &mut bindings);
    }
    for (template, arg) in def.params.iter().zip(args) {
        unify(template, &arg.ty(), &mut bindings);
    }
    let mut type_args = Vec::with_capacity(def.generic_params.len());
    for g in &def.generic_params {
        let bound = bindings.get(g).cloned().ok_or_else(|| MappingError::CannotRemap {
            reason: format!("argument générique {} de {} non inférable", g, def.name),
        })?;
        type_args.push(bound);
    }
    let method = MethodRef { def, type_args };
    for (index, (expected, arg)) in method.param_types().iter().zip(args).enumerate() {
        let found = arg.ty();
        if !schema.is_assignable(&found, expected) {
            return Err(MappingError::ArgumentTypeMismatch {
                method: method.to_string(),
                index,
                expected: expected.clone(),
                found,
            });
        }
    }
    Ok(method)
}

/// Construit un appel statique `Famille.Nom(args..)`
pub fn call_static(
    schema: &Schema,
    declaring: &str,
    name: &str,
    args: Vec<Expr>,
) -> Result<Expr, MappingError> {
    let def = Catalog::global()
        .lookup(declaring, name, args.len())
        .ok_or_else(|| MappingError::CannotRemap {
            reason: format!("méthode inconnue {}.{}/{}", declaring, name, args.len()),
        })?;
    let method = instantiate(schema, def, None, &args)?;
    Ok(Expr::Call {
        receiver: None,
        method,
        args,
    })
}

/// Construit un appel d'instance `receveur.Nom(args..)`
pub fn call_instance(
    schema: &Schema,
    receiver: Expr,
    declaring: &str,
    name: &str,
    args: Vec<Expr>,
) -> Result<Expr, MappingError> {
    let def = Catalog::global()
        .lookup(declaring, name, args.len())
        .ok_or_else(|| MappingError::CannotRemap {
            reason: format!("méthode inconnue {}.{}/{}", declaring, name, args.len()),
        })?;
    let method = instantiate(schema, def, Some(&receiver), &args)?;
    Ok(Expr::Call {
        receiver: Some(Box::new(receiver)),
        method,
        args,
    })
}

// --- Raccourcis pour les opérateurs de requête ---

pub fn where_(schema: &Schema, source: Expr, predicate: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "Where", vec![source, Expr::Lambda(predicate)])
}

pub fn select(schema: &Schema, source: Expr, selector: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "Select", vec![source, Expr::Lambda(selector)])
}

pub fn order_by(schema: &Schema, source: Expr, key: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "OrderBy", vec![source, Expr::Lambda(key)])
}

pub fn order_by_descending(schema: &Schema, source: Expr, key: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "OrderByDescending", vec![source, Expr::Lambda(key)])
}

pub fn then_by(schema: &Schema, source: Expr, key: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "ThenBy", vec![source, Expr::Lambda(key)])
}

pub fn then_by_descending(schema: &Schema, source: Expr, key: Lambda) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "ThenByDescending", vec![source, Expr::Lambda(key)])
}

pub fn any(schema: &Schema, source: Expr, predicate: Option<Lambda>) -> Result<Expr, MappingError> {
    let declaring = sequence_family(&source);
    let mut args = vec![source];
    args.extend(predicate.map(Expr::Lambda));
    call_static(schema, declaring, "Any", args)
}

pub fn count(schema: &Schema, source: Expr) -> Result<Expr, MappingError> {
    let declaring = sequence_family(&source);
    call_static(schema, declaring, "Count", vec![source])
}

pub fn first(schema: &Schema, source: Expr) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "First", vec![source])
}

pub fn take(schema: &Schema, source: Expr, n: i64) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "Take", vec![source, Expr::constant(n)])
}

pub fn skip(schema: &Schema, source: Expr, n: i64) -> Result<Expr, MappingError> {
    call_static(schema, QUERYABLE, "Skip", vec![source, Expr::constant(n)])
}

pub fn contains(schema: &Schema, collection: Expr, item: Expr) -> Result<Expr, MappingError> {
    call_static(schema, ENUMERABLE, "Contains", vec![collection, item])
}

/// Méthode d'instance sur String (Contains, StartsWith, ToUpper...)
pub fn string_method(
    schema: &Schema,
    target: Expr,
    name: &str,
    args: Vec<Expr>,
) -> Result<Expr, MappingError> {
    call_instance(schema, target, STRING, name, args)
}

/// Queryable pour une requête, Enumerable pour une collection membre
fn sequence_family(source: &Expr) -> &'static str {
    match source.ty() {
        TypeRef::Generic { name, .. }
            if name == super::typeside::generic::QUERYABLE
                || name == super::typeside::generic::ORDERED_QUERYABLE =>
        {
            QUERYABLE
        }
        _ => ENUMERABLE,
    }
}
