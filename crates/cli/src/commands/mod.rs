pub mod emit;
pub mod serve;
pub mod view;
