pub mod gamma;
pub mod mvn;
pub mod traits;

pub use gamma::Gamma;
pub use mvn::Mvn;
