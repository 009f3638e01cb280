use std::fmt;
use std::marker::PhantomData;

use objwire_types::{FromValue, IntoValue};

use crate::error::StateResult;
use crate::live::LiveObject;

/// A typed handle to one named field, usually declared as a constant:
///
/// ```ignore
/// const COUNT: Field<i64> = Field::new("count");
/// COUNT.set(&mut object, COUNT.get(&mut object)? + 1)?;
/// ```
pub struct Field<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: FromValue> Field<T> {
    pub fn get(&self, object: &mut LiveObject) -> StateResult<T> {
        object.get_as(self.name)
    }
}

impl<T: IntoValue> Field<T> {
    pub fn set(&self, object: &mut LiveObject, value: T) -> StateResult<()> {
        object.set(self.name, value)?;
        Ok(())
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.name)
    }
}
