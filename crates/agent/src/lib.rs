//! agent端: 基于租约的在线注册

pub mod register;

pub use register::Registrar;
