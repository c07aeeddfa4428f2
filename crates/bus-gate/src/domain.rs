/// Clocks feeding the bus controller.
///
/// They are enabled in declaration order and disabled in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Clock {
    Interface,
    Core,
}

/// Abstracts the power domain behind a bus controller.
///
/// Implementors only perform single steps; [`BusGate`](crate::BusGate)
/// owns the ordering and the rollback when a later step fails.
#[allow(async_fn_in_trait)]
pub trait PowerDomain {
    /// Error type for power-up failures.
    type Error: core::fmt::Debug;

    /// Take a runtime power reference on the controller's parent device.
    async fn runtime_get(&mut self) -> Result<(), Self::Error>;

    /// Drop the reference taken by [`runtime_get`](Self::runtime_get).
    async fn runtime_put(&mut self);

    /// Domains without gateable clocks only take the runtime reference.
    fn has_clocks(&self) -> bool {
        true
    }

    /// Prepare and enable one clock.
    async fn clock_enable(&mut self, clock: Clock) -> Result<(), Self::Error>;

    /// Disable and unprepare one clock.
    fn clock_disable(&mut self, clock: Clock);
}
