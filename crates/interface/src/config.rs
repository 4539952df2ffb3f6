//! Compile-time configuration.

/// Target VM version. Only versions that change the emitted code are
/// distinguished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvmVersion {
    /// Before `PUSH0`; zero constants push an explicit immediate.
    Paris,
    /// Introduces `PUSH0`.
    Shanghai,
    #[default]
    Cancun,
}

impl EvmVersion {
    pub fn supports_push0(self) -> bool {
        self >= Self::Shanghai
    }
}

/// External-function dispatch scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DispatchScheme {
    /// A compare chain in ascending selector order.
    #[default]
    Linear,
}

/// Options threaded through code generation.
#[derive(Clone, Debug, Default)]
pub struct CompilerOpts {
    pub evm_version: EvmVersion,
    pub dispatch: DispatchScheme,
}
