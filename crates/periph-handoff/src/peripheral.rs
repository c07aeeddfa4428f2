/// The primary VM's side of the peripheral being handed over.
///
/// Calls are synchronous and expected to be cheap: they touch the
/// interrupt controller and the driver's own bookkeeping, never the bus.
pub trait Peripheral {
    /// Whether the device is powered and able to take part in a hand-off.
    fn is_powered(&self) -> bool;

    fn mask_interrupt(&mut self);

    fn unmask_interrupt(&mut self);

    /// Drop input events still queued from before the interrupt was masked,
    /// so nothing stale is reported once ownership comes back.
    fn release_all_contacts(&mut self);
}

impl<P: Peripheral + ?Sized> Peripheral for &mut P {
    fn is_powered(&self) -> bool {
        (**self).is_powered()
    }

    fn mask_interrupt(&mut self) {
        (**self).mask_interrupt()
    }

    fn unmask_interrupt(&mut self) {
        (**self).unmask_interrupt()
    }

    fn release_all_contacts(&mut self) {
        (**self).release_all_contacts()
    }
}
