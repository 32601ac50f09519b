mod locale;
mod message;
mod provider;

pub use locale::*;
pub use message::*;
pub use provider::*;
