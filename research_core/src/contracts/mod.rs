pub mod repositories;
pub mod unit_of_work;

pub use repositories::*;
pub use unit_of_work::UnitOfWork;
