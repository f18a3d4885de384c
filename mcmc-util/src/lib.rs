pub mod chain;
pub mod stan_csv;
pub mod traits;
