mod clock_table;

use std::cell::Cell;
use std::rc::Rc;

use super::HostClock;

/// Host clock driven by the test.
#[derive(Debug, Clone, Default)]
pub(super) struct ManualHost(Rc<Cell<i64>>);

impl ManualHost {
    pub(super) fn at(ns: i64) -> Self {
        Self(Rc::new(Cell::new(ns)))
    }

    pub(super) fn advance(&self, ns: i64) {
        self.0.set(self.0.get() + ns);
    }
}

impl HostClock for ManualHost {
    fn now_ns(&self) -> i64 {
        self.0.get()
    }
}
