use std::cell::RefCell;
use std::rc::Rc;

use mirror_dtype::HasDType;

use crate::identity::StorageKey;
use crate::session::Session;

/// Host allocation shared by every view derived from one array.
///
/// The vector is never reallocated after construction: device→host copies
/// write into it in place, so slices handed out earlier stay valid.
#[derive(Debug)]
pub(crate) struct HostStorage<T: HasDType> {
    pub(crate) session: Rc<Session>,
    pub(crate) data: RefCell<Vec<T>>,
}

impl<T: HasDType> HostStorage<T> {
    pub(crate) fn new(session: Rc<Session>, data: Vec<T>) -> Rc<Self> {
        Rc::new(Self { session, data: RefCell::new(data) })
    }

    pub(crate) fn key(self: &Rc<Self>) -> StorageKey {
        StorageKey::of(Rc::as_ptr(self))
    }

    pub(crate) fn len(&self) -> usize {
        self.data.borrow().len()
    }
}

impl<T: HasDType> Drop for HostStorage<T> {
    fn drop(&mut self) {
        self.session.identity().remove(StorageKey::of(self as *const Self));
    }
}
