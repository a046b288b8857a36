pub mod credentials;
pub mod device;
pub mod shadows;

pub use credentials::*;
pub use device::*;
pub use shadows::*;
