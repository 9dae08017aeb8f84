pub mod api;
pub mod board;
pub mod error;
pub mod filter;
pub mod ranking;
pub mod replay;
pub mod score;
pub mod ties;

pub use api::*;
pub use board::*;
pub use error::{OutteError, OutteResult};
pub use filter::{CleaningFilter, FilterConfig};
pub use ranking::*;
pub use score::*;
pub use ties::{Resolved, resolve};
