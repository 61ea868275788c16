//! Fixtures partagées des tests d'intégration.

#![allow(dead_code)]

use exprmap::core::expr::{Expr, Lambda, Parameter};
use exprmap::core::instance::ObjectValue;
use exprmap::core::schema::Schema;
use exprmap::core::typeside::TypeRef;
use exprmap::{Registry, RegistryBuilder};

/// Address { City } ; Customer { Id, Name, Home }
/// Order { Id, Total, Customer } ; OrderDto { Id, Total, CustomerName, CustomerId }
pub fn shop_schema() -> Schema {
    let mut s = Schema::new("Shop");
    s.add_type("Address")
     .add_type("Customer")
     .add_type("Order")
     .add_type("OrderDto")
     .add_member("Address", "City", TypeRef::string())
     .add_key("Customer", "Id", TypeRef::int())
     .add_member("Customer", "Name", TypeRef::string())
     .add_member("Customer", "Home", TypeRef::shape("Address"))
     .add_key("Order", "Id", TypeRef::int())
     .add_member("Order", "Total", TypeRef::float())
     .add_member("Order", "Customer", TypeRef::shape("Customer"))
     .add_key("OrderDto", "Id", TypeRef::int())
     .add_member("OrderDto", "Total", TypeRef::float())
     .add_member("OrderDto", "CustomerName", TypeRef::string())
     .add_member("OrderDto", "CustomerId", TypeRef::int());
    s
}

pub fn order() -> TypeRef {
    TypeRef::shape("Order")
}

pub fn dto() -> TypeRef {
    TypeRef::shape("OrderDto")
}

/// Order → OrderDto par conventions seules, avec mapping inverse
pub fn shop_registry() -> Registry {
    let mut builder = RegistryBuilder::new(shop_schema());
    builder.create_mapping(order(), dto()).reverse_map();
    builder.seal().expect("configuration valide")
}

/// `d => d.<path> == value` sur OrderDto
pub fn dto_predicate(schema: &Schema, path: &str, value: Expr) -> Expr {
    let d = Parameter::new("d", dto());
    Expr::lambda(vec![d.clone()], Expr::param(&d).access(schema, path).unwrap().equal(value))
}

pub fn predicate_type(ty: TypeRef) -> TypeRef {
    TypeRef::expression(vec![ty], TypeRef::boolean())
}

pub fn customer(id: i64, name: &str) -> ObjectValue {
    ObjectValue::new("Customer").with("Id", id).with("Name", name)
}

pub fn stored_order(id: i64, total: f64, customer: ObjectValue) -> ObjectValue {
    ObjectValue::new("Order")
        .with("Id", id)
        .with("Total", total)
        .with("Customer", customer)
}

/// Corps d'une lambda, pour les assertions textuelles
pub fn body(lambda: &Lambda) -> String {
    lambda.body.to_string()
}
