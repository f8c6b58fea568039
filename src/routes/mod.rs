mod api_docs;
mod health_check;
mod home;
mod newsletter;

pub use api_docs::*;
pub use health_check::*;
pub use home::*;
pub use newsletter::*;
