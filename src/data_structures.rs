//! Miscellaneous data structures.

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Container for custom application data, not used by the worker itself, only useful for the
/// application.
#[derive(Debug, Clone)]
pub struct AppData(Rc<dyn Any>);

impl Default for AppData {
    fn default() -> Self {
        Self::new(())
    }
}

impl Deref for AppData {
    type Target = Rc<dyn Any>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AppData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AppData {
    /// Store any custom application data.
    pub fn new<T: Any>(app_data: T) -> Self {
        Self(Rc::new(app_data))
    }
}
