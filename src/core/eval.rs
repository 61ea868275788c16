// =============================================================================
// EVAL — Évaluateur d'expressions en mémoire
// =============================================================================
//
// Ce module interprète un arbre Expr DIRECTEMENT sur des Value,
// sans backend. C'est lui qui donne un sens concret :
//   - aux prédicats d'équivalence (is_equivalent(source, destination))
//   - aux expressions personnalisées des règles, quand on convertit un objet
//   - aux requêtes réécrites, exécutées par le backend mémoire
//
// COMMENT ÇA MARCHE :
//
//   q.Where(o => o.Customer.Name == "Alice").OrderBy(o => o.Id)
//
//   1. Env lie chaque ParamId à une Value (q ↦ [o1, o2, ...])
//   2. Member : on descend dans l'objet (Null se propage)
//   3. Call   : on dispatche sur (famille, nom) ; les lambdas passées en
//               argument sont appliquées élément par élément
//   4. Une chaîne OrderBy/ThenBy est triée EN UNE FOIS avec une clé
//      composite, ce qui donne la sémantique stable attendue
//
// SÉMANTIQUE DE NULL :
//   null == null est vrai, null == x est faux, null < x est faux.
//   Accéder à un membre de null donne null.
//
// =============================================================================

use std::cmp::Ordering;
use std::collections::HashMap;

use super::expr::{BinaryOp, Expr, Lambda, MethodRef, ParamId, Parameter, UnaryOp};
use super::query::{ENUMERABLE, QUERYABLE, STRING};
use super::typeside::{BaseType, TypeRef, Value};
use crate::error::EvalError;

/// Les liaisons paramètre → valeur.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: HashMap<ParamId, Value>,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    pub fn bind(&mut self, param: &Parameter, value: Value) -> &mut Self {
        self.bindings.insert(param.id, value);
        self
    }

    pub fn get(&self, param: &Parameter) -> Option<&Value> {
        self.bindings.get(&param.id)
    }
}

/// Applique une lambda à des arguments, dans un environnement englobant.
pub fn apply(lambda: &Lambda, args: &[Value], outer: &Env) -> Result<Value, EvalError> {
    if lambda.params.len() != args.len() {
        return Err(EvalError::Arity {
            expected: lambda.params.len(),
            found: args.len(),
        });
    }
    let mut env = outer.clone();
    for (p, v) in lambda.params.iter().zip(args) {
        env.bind(p, v.clone());
    }
    eval(&lambda.body, &env)
}

/// Applique une lambda booléenne. Null compte pour faux.
pub fn apply_predicate(lambda: &Lambda, args: &[Value], outer: &Env) -> Result<bool, EvalError> {
    match apply(lambda, args, outer)? {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(EvalError::TypeError {
            op: "prédicat".into(),
            detail: format!("booléen attendu, reçu {}", other.kind()),
        }),
    }
}

/// Évalue une expression.
pub fn eval(expr: &Expr, env: &Env) -> Result<Value, EvalError> {
    match expr {
        Expr::Parameter(p) => env
            .get(p)
            .cloned()
            .ok_or_else(|| EvalError::UnboundParameter { name: p.name.clone() }),
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Member { target, member } => match eval(target, env)? {
            Value::Object(o) => Ok(o.get(&member.name).clone()),
            Value::Null => Ok(Value::Null),
            other => Err(EvalError::NotAnObject {
                member: member.name.clone(),
                found: other.kind(),
            }),
        },
        Expr::Unary { op, operand, ty } => {
            let v = eval(operand, env)?;
            eval_unary(*op, v, ty)
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, env),
        Expr::Call { receiver, method, args } => eval_call(expr, receiver.as_deref(), method, args, env),
        Expr::Lambda(_) => Err(EvalError::TypeError {
            op: "lambda".into(),
            detail: "une lambda n'est évaluable qu'en argument d'un appel".into(),
        }),
    }
}

fn eval_unary(op: UnaryOp, v: Value, ty: &TypeRef) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => match v {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("!", &other)),
        },
        UnaryOp::Negate => match v {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("-", &other)),
        },
        UnaryOp::Convert => Ok(match (v, ty.underlying()) {
            (Value::Integer(i), TypeRef::Base(BaseType::Float)) => Value::Float(i as f64),
            (Value::Float(f), TypeRef::Base(BaseType::Integer)) => Value::Integer(f as i64),
            // les autres conversions (vers Object, Nullable, base) ne changent pas la valeur
            (v, _) => v,
        }),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, env: &Env) -> Result<Value, EvalError> {
    if op.is_logical() {
        let l = truthy(eval(left, env)?)?;
        let short = match op {
            BinaryOp::AndAlso => !l,
            _ => l,
        };
        if short {
            return Ok(Value::Boolean(l));
        }
        return Ok(Value::Boolean(truthy(eval(right, env)?)?));
    }
    let l = eval(left, env)?;
    let r = eval(right, env)?;
    if op.is_comparison() {
        return Ok(Value::Boolean(compare_values(&l, op, &r)));
    }
    arithmetic(op, l, r)
}

fn truthy(v: Value) -> Result<bool, EvalError> {
    match v {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(type_error("&&/||", &other)),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(a), b) if op == BinaryOp::Add => Ok(Value::String(a + &raw_text(&b))),
        (a, Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(raw_text(&a) + &b)),
        (Value::Integer(a), Value::Integer(b)) => match op {
            BinaryOp::Add => Ok(Value::Integer(a.wrapping_add(b))),
            BinaryOp::Sub => Ok(Value::Integer(a.wrapping_sub(b))),
            BinaryOp::Mul => Ok(Value::Integer(a.wrapping_mul(b))),
            BinaryOp::Div if b == 0 => Err(EvalError::TypeError {
                op: "/".into(),
                detail: "division entière par zéro".into(),
            }),
            BinaryOp::Div => Ok(Value::Integer(a / b)),
            _ => Err(EvalError::TypeError {
                op: op.to_string(),
                detail: "opérateur non arithmétique".into(),
            }),
        },
        (a, b) => match (as_float(&a), as_float(&b)) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                _ => x / y,
            })),
            _ => Err(EvalError::TypeError {
                op: op.to_string(),
                detail: format!("{} et {} ne sont pas numériques", a.kind(), b.kind()),
            }),
        },
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Texte brut d'une valeur (sans guillemets), pour la concaténation
fn raw_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Enum { variant, .. } => variant.clone(),
        other => other.to_string(),
    }
}

fn type_error(op: &str, v: &Value) -> EvalError {
    EvalError::TypeError {
        op: op.to_string(),
        detail: format!("opérande de type {} non supporté", v.kind()),
    }
}

/// Compare deux valeurs selon un opérateur de comparaison
pub fn compare_values(lhs: &Value, op: BinaryOp, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => matches!(op, BinaryOp::Eq | BinaryOp::Lte | BinaryOp::Gte),
        (Value::Null, _) | (_, Value::Null) => op == BinaryOp::Neq,
        (Value::Float(a), Value::Float(b)) => match op {
            BinaryOp::Eq => (a - b).abs() < f64::EPSILON,
            BinaryOp::Neq => (a - b).abs() >= f64::EPSILON,
            _ => ordering_matches(op, a.partial_cmp(b)),
        },
        (Value::Integer(_), Value::Float(_)) | (Value::Float(_), Value::Integer(_)) => {
            let (a, b) = (as_float(lhs).unwrap_or_default(), as_float(rhs).unwrap_or_default());
            compare_values(&Value::Float(a), op, &Value::Float(b))
        }
        (Value::Boolean(a), Value::Boolean(b)) => match op {
            BinaryOp::Eq => a == b,
            BinaryOp::Neq => a != b,
            // pas de < > pour les booléens
            _ => false,
        },
        (Value::Enum { ty: ta, variant: va }, Value::Enum { ty: tb, variant: vb }) => match op {
            BinaryOp::Eq => ta == tb && va == vb,
            BinaryOp::Neq => ta != tb || va != vb,
            _ => false,
        },
        (Value::Object(a), Value::Object(b)) => match op {
            BinaryOp::Eq => a == b,
            BinaryOp::Neq => a != b,
            _ => false,
        },
        (Value::Integer(_), Value::Integer(_)) | (Value::String(_), Value::String(_)) => {
            match op {
                BinaryOp::Eq => lhs == rhs,
                BinaryOp::Neq => lhs != rhs,
                _ => ordering_matches(op, Some(cmp_values(lhs, rhs))),
            }
        }
        // Types incompatibles : seule l'inégalité est vraie
        _ => op == BinaryOp::Neq,
    }
}

fn ordering_matches(op: BinaryOp, ord: Option<Ordering>) -> bool {
    let Some(ord) = ord else { return false };
    match op {
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Lte => ord != Ordering::Greater,
        BinaryOp::Gte => ord != Ordering::Less,
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Neq => ord != Ordering::Equal,
        _ => false,
    }
}

/// Comparaison ordonnée de deux Value (pour trier). Null en premier.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Enum { variant: x, .. }, Value::Enum { variant: y, .. }) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// --- Appels de méthodes ---

fn eval_call(
    whole: &Expr,
    receiver: Option<&Expr>,
    method: &MethodRef,
    args: &[Expr],
    env: &Env,
) -> Result<Value, EvalError> {
    let declaring = method.def.declaring.as_str();
    let name = method.name();
    match declaring {
        STRING => {
            let target = match receiver {
                Some(r) => eval(r, env)?,
                None => return Err(unsupported(method)),
            };
            let arg_values = args.iter().map(|a| eval(a, env)).collect::<Result<Vec<_>, _>>()?;
            string_method(name, target, &arg_values).ok_or_else(|| unsupported(method))
        }
        QUERYABLE | ENUMERABLE => {
            if matches!(name, "OrderBy" | "OrderByDescending" | "ThenBy" | "ThenByDescending") {
                return eval_ordering(whole, env);
            }
            let source = args.first().ok_or_else(|| unsupported(method))?;
            let items = sequence(eval(source, env)?, name)?;
            eval_sequence_op(method, items, &args[1..], env)
        }
        _ => Err(unsupported(method)),
    }
}

fn unsupported(method: &MethodRef) -> EvalError {
    EvalError::UnsupportedMethod {
        name: format!("{}.{}", method.def.declaring, method.name()),
    }
}

fn sequence(v: Value, op: &str) -> Result<Vec<Value>, EvalError> {
    match v {
        Value::List(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(type_error(op, &other)),
    }
}

fn lambda_arg<'a>(args: &'a [Expr], i: usize, method: &MethodRef) -> Result<&'a Lambda, EvalError> {
    match args.get(i) {
        Some(Expr::Lambda(l)) => Ok(l),
        // une lambda citée peut avoir été enveloppée dans une conversion
        Some(Expr::Unary { operand, op: UnaryOp::Convert, .. }) => match operand.as_ref() {
            Expr::Lambda(l) => Ok(l),
            _ => Err(unsupported(method)),
        },
        _ => Err(unsupported(method)),
    }
}

fn eval_sequence_op(
    method: &MethodRef,
    items: Vec<Value>,
    rest: &[Expr],
    env: &Env,
) -> Result<Value, EvalError> {
    match (method.name(), rest.len()) {
        ("Where", 1) => {
            let pred = lambda_arg(rest, 0, method)?;
            let mut out = Vec::new();
            for item in items {
                if apply_predicate(pred, std::slice::from_ref(&item), env)? {
                    out.push(item);
                }
            }
            Ok(Value::List(out))
        }
        ("Select", 1) => {
            let sel = lambda_arg(rest, 0, method)?;
            let out = items
                .iter()
                .map(|item| apply(sel, std::slice::from_ref(item), env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(out))
        }
        ("Any", 0) => Ok(Value::Boolean(!items.is_empty())),
        ("Any", 1) => {
            let pred = lambda_arg(rest, 0, method)?;
            for item in &items {
                if apply_predicate(pred, std::slice::from_ref(item), env)? {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok(Value::Boolean(false))
        }
        ("Count", 0) => Ok(Value::Integer(items.len() as i64)),
        ("First", 0) => items.into_iter().next().ok_or_else(|| EvalError::TypeError {
            op: "First".into(),
            detail: "séquence vide".into(),
        }),
        ("FirstOrDefault", 0) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
        ("Take", 1) | ("Skip", 1) => {
            let n = match eval(&rest[0], env)? {
                Value::Integer(n) => n.max(0) as usize,
                other => return Err(type_error(method.name(), &other)),
            };
            let out = if method.name() == "Take" {
                items.into_iter().take(n).collect()
            } else {
                items.into_iter().skip(n).collect()
            };
            Ok(Value::List(out))
        }
        ("Contains", 1) => {
            let needle = eval(&rest[0], env)?;
            Ok(Value::Boolean(
                items.iter().any(|i| compare_values(i, BinaryOp::Eq, &needle)),
            ))
        }
        _ => Err(unsupported(method)),
    }
}

/// Évalue une chaîne OrderBy(..).ThenBy(..)... en un seul tri stable.
fn eval_ordering(expr: &Expr, env: &Env) -> Result<Value, EvalError> {
    let mut keys: Vec<(&Lambda, bool)> = Vec::new();
    let mut current = expr;
    loop {
        let Expr::Call { method, args, receiver: None } = current else {
            break;
        };
        let name = method.name();
        let descending = name.ends_with("Descending");
        if !name.starts_with("OrderBy") && !name.starts_with("ThenBy") {
            break;
        }
        keys.push((lambda_arg(args, 1, method)?, descending));
        current = &args[0];
        if name.starts_with("OrderBy") {
            break;
        }
    }
    keys.reverse();
    let items = sequence(eval(current, env)?, "OrderBy")?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let mut k = Vec::with_capacity(keys.len());
        for (sel, _) in &keys {
            k.push(apply(sel, std::slice::from_ref(&item), env)?);
        }
        keyed.push((k, item));
    }
    keyed.sort_by(|(ka, _), (kb, _)| {
        for (i, (_, descending)) in keys.iter().enumerate() {
            let ord = cmp_values(&ka[i], &kb[i]);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(Value::List(keyed.into_iter().map(|(_, v)| v).collect()))
}

fn string_method(name: &str, target: Value, args: &[Value]) -> Option<Value> {
    let s = match target {
        Value::String(s) => s,
        Value::Null => return Some(Value::Null),
        _ => return None,
    };
    let arg = |i: usize| match args.get(i) {
        Some(Value::String(a)) => Some(a.as_str()),
        _ => None,
    };
    Some(match name {
        "Contains" => Value::Boolean(s.contains(arg(0)?)),
        "StartsWith" => Value::Boolean(s.starts_with(arg(0)?)),
        "EndsWith" => Value::Boolean(s.ends_with(arg(0)?)),
        "ToUpper" => Value::String(s.to_uppercase()),
        "ToLower" => Value::String(s.to_lowercase()),
        "Trim" => Value::String(s.trim().to_string()),
        _ => return None,
    })
}
