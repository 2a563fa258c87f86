pub mod health;
pub mod diagnostics;
pub mod python_run;
pub mod python_install;
pub mod python_cleanup;

pub use health::*;
pub use diagnostics::*;
pub use python_run::*;
pub use python_install::*;
pub use python_cleanup::*;
