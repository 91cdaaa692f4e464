pub mod classify;
pub mod extract;
pub mod run;

pub use classify::*;
pub use extract::*;
pub use run::*;
