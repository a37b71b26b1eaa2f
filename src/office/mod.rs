//! Office module containing expediente and payment management

pub mod core;
pub mod expediente;
pub mod pago;

pub use self::core::*;
pub use expediente::*;
pub use pago::*;
