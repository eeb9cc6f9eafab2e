pub mod boundary;
pub mod cadastre;
pub mod global_variables;
