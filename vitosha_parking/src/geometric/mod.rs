pub mod clip;
pub mod grid;
pub mod municipal;
pub mod street;
