//! # relx-exec: Native Conventions
//!
//! The built-in calling conventions of the engine, made executable:
//!
//! - **`convertlets`**: bridges between `FEDERATED`, `ITERATOR`, `COMPILED` and
//!   `COMPILED_RECORD`.
//! - **`implementors`**: per-convention operator implementors.
//! - **`interpreter`**: runs the generated fragments against a [`RowSource`].
//! - **`eval`**: scalar evaluation shared by pipelines and programs.
//!
//! [`default_registry`] wires these together with the built-in rules into the
//! registry an application builds once at startup.

pub mod convertlets;
pub mod error;
pub mod eval;
pub mod implementors;
pub mod interpreter;
pub mod source;

pub use error::ExecError;
pub use eval::Row;
pub use interpreter::Interpreter;
pub use source::{InMemoryRowSource, RowSource};

use relx_core::codegen::CodeGenerator;
use relx_core::error::ConfigurationError;
use relx_core::memo::PhysicalPlan;
use relx_core::registry::{Registry, RegistryBuilder};
use std::sync::Arc;
use tracing::debug;

/// Register the built-in convertlets and implementors on `builder`.
pub fn register_native(builder: &mut RegistryBuilder) -> Result<(), ConfigurationError> {
    for convertlet in convertlets::builtin_convertlets() {
        builder.register_convertlet(convertlet)?;
    }
    for implementor in implementors::builtin_implementors() {
        builder.register_implementor(implementor)?;
    }
    Ok(())
}

/// Built-in conventions, convertlets, implementors and rules.
pub fn default_registry() -> Result<Arc<Registry>, ConfigurationError> {
    let mut builder = RegistryBuilder::with_builtin_conventions();
    register_native(&mut builder)?;
    relx_rules::register_default_rules(&mut builder)?;
    builder.build()
}

/// Generate code for `plan` and run it.
pub fn execute(plan: &PhysicalPlan, registry: Arc<Registry>, source: &dyn RowSource) -> Result<Vec<Row>, ExecError> {
    let fragment = CodeGenerator::new(registry).generate(plan)?;
    let rows = Interpreter::new(source).run(&fragment)?;
    debug!("Executed plan, {} rows", rows.len());
    Ok(rows)
}
