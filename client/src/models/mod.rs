pub mod credentials;
pub mod organization;
pub mod session;
pub mod user;

pub use credentials::*;
pub use organization::*;
pub use session::*;
pub use user::*;
