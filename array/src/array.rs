use std::cell::Ref;
use std::fmt;
use std::ops::{Bound, Range, RangeBounds};
use std::rc::Rc;

use mirror_device::{DeviceBuffer, DeviceInfo};
use mirror_dtype::{HasDType, as_bytes, as_bytes_mut};
use smallvec::SmallVec;

use crate::coherence::{CoherenceState, Location};
use crate::error::{
    IndexOutOfBoundsSnafu, LengthMismatchSnafu, RangeOutOfBoundsSnafu, ReshapeSizeMismatchSnafu, Result,
    ZeroDimensionalSnafu,
};
use crate::identity::{SharedState, StorageKey};
use crate::session::Session;
use crate::storage::HostStorage;
use crate::transfer::{TransferOptions, TransferOutcome};

type Shape = SmallVec<[usize; 4]>;

/// A host array mirrored to device memory on demand.
///
/// A `MirrorArray` is a contiguous view (offset + shape) into a host storage.
/// Every view derived from the same storage shares one [`CoherenceState`],
/// so a write through any view is seen by all of them. Transfers always move
/// the whole storage, whichever view requests them.
///
/// Mutating methods take `&self`: element writes go through the storage's
/// `RefCell`, and every one of them marks the host mutated.
///
/// The type is `!Send + !Sync`. Coherence state is unsynchronized shared
/// data; views of one storage must stay on one thread.
///
/// # Examples
///
/// ```
/// # use std::rc::Rc;
/// # use std::sync::Arc;
/// # use mirror_array::{MirrorArray, Session, TransferOptions, TransferOutcome};
/// # use mirror_device::{CpuRuntime, DeviceConfig};
/// let session = Rc::new(Session::new(Arc::new(CpuRuntime::new()), DeviceConfig::default()).unwrap());
/// let a = MirrorArray::from_vec(&session, vec![1.0f32, 2.0, 3.0, 4.0]);
///
/// assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
/// assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Skipped);
///
/// a.set(0, 9.0).unwrap();
/// assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
/// ```
pub struct MirrorArray<T: HasDType> {
    storage: Rc<HostStorage<T>>,
    state: SharedState,
    offset: usize,
    shape: Shape,
}

impl<T: HasDType> MirrorArray<T> {
    /// One-dimensional array owning `data`.
    pub fn from_vec(session: &Rc<Session>, data: Vec<T>) -> Self {
        let shape = Shape::from_slice(&[data.len()]);
        Self::from_storage(HostStorage::new(Rc::clone(session), data), 0, shape)
    }

    /// Array of the given shape owning `data` (row-major).
    pub fn from_shape_vec(session: &Rc<Session>, shape: &[usize], data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        snafu::ensure!(
            expected == data.len(),
            ReshapeSizeMismatchSnafu { from: vec![data.len()], to: shape.to_vec() }
        );
        Ok(Self::from_storage(HostStorage::new(Rc::clone(session), data), 0, Shape::from_slice(shape)))
    }

    /// Array of the given shape filled with `T::default()`.
    pub fn zeros(session: &Rc<Session>, shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self::from_storage(HostStorage::new(Rc::clone(session), vec![T::default(); len]), 0, Shape::from_slice(shape))
    }

    /// Build a view, attaching it to the coherence state of its storage.
    fn from_storage(storage: Rc<HostStorage<T>>, offset: usize, shape: Shape) -> Self {
        let state = storage.session.identity().lookup_or_create(storage.key(), CoherenceState::new);
        Self { storage, state, offset, shape }
    }

    fn derive(&self, offset: usize, shape: Shape) -> Self {
        Self::from_storage(Rc::clone(&self.storage), offset, shape)
    }

    // ------------------------------------------------------------------
    // Shape and identity
    // ------------------------------------------------------------------

    pub fn session(&self) -> &Rc<Session> {
        &self.storage.session
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in this view.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element offset of this view into its storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte length of the whole storage, which is what a transfer moves.
    pub fn storage_bytes(&self) -> usize {
        T::DTYPE.byte_len(self.storage.len())
    }

    pub fn storage_key(&self) -> StorageKey {
        self.storage.key()
    }

    /// Whether `other` is a view of the same storage.
    pub fn shares_storage(&self, other: &MirrorArray<T>) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// Elements per step along the first axis.
    fn row_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Another view of exactly the same elements.
    pub fn view(&self) -> Self {
        self.derive(self.offset, self.shape.clone())
    }

    /// Sub-view of `range` along the first axis.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        snafu::ensure!(self.ndim() > 0, ZeroDimensionalSnafu);
        let rows = self.shape[0];
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => rows,
        };
        snafu::ensure!(start <= end && end <= rows, RangeOutOfBoundsSnafu { start, end, len: rows });

        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Ok(self.derive(self.offset + start * self.row_len(), shape))
    }

    /// Sub-view at `index` along the first axis, dropping that axis.
    pub fn index(&self, index: usize) -> Result<Self> {
        snafu::ensure!(self.ndim() > 0, ZeroDimensionalSnafu);
        snafu::ensure!(index < self.shape[0], IndexOutOfBoundsSnafu { index, len: self.shape[0] });
        Ok(self.derive(self.offset + index * self.row_len(), Shape::from_slice(&self.shape[1..])))
    }

    /// The same elements under a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let len: usize = shape.iter().product();
        snafu::ensure!(
            len == self.len(),
            ReshapeSizeMismatchSnafu { from: self.shape.to_vec(), to: shape.to_vec() }
        );
        Ok(self.derive(self.offset, Shape::from_slice(shape)))
    }

    // ------------------------------------------------------------------
    // Host reads
    // ------------------------------------------------------------------

    /// Element at flat position `index` of this view.
    pub fn get(&self, index: usize) -> Result<T> {
        let len = self.len();
        snafu::ensure!(index < len, IndexOutOfBoundsSnafu { index, len });
        Ok(self.storage.data.borrow()[self.offset + index])
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.storage.data.borrow()[self.range()].to_vec()
    }

    /// Run `f` over the elements of this view.
    pub fn with_host<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.storage.data.borrow()[self.range()])
    }

    // ------------------------------------------------------------------
    // Host writes
    // ------------------------------------------------------------------

    /// Record a host write that bypassed the methods below.
    pub fn mark_host_mutated(&self) {
        self.state.borrow_mut().mark_host_mutated();
    }

    /// Mutate the elements of this view in place.
    ///
    /// Every other writer goes through here.
    pub fn update<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> R {
        let result = {
            let range = self.range();
            let mut data = self.storage.data.borrow_mut();
            f(&mut data[range])
        };
        self.mark_host_mutated();
        result
    }

    /// Assign the element at flat position `index`.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let len = self.len();
        snafu::ensure!(index < len, IndexOutOfBoundsSnafu { index, len });
        self.update(|data| data[index] = value);
        Ok(())
    }

    /// Overwrite every element of this view.
    pub fn assign(&self, values: &[T]) -> Result<()> {
        let expected = self.len();
        snafu::ensure!(values.len() == expected, LengthMismatchSnafu { expected, actual: values.len() });
        self.update(|data| data.copy_from_slice(values));
        Ok(())
    }

    /// Overwrite the rows in `range` along the first axis.
    pub fn assign_slice(&self, range: impl RangeBounds<usize>, values: &[T]) -> Result<()> {
        self.slice(range)?.assign(values)
    }

    pub fn fill(&self, value: T) {
        self.update(|data| data.fill(value));
    }

    /// Replace every element with `f(element)`.
    pub fn map_inplace(&self, f: impl Fn(T) -> T) {
        self.update(|data| data.iter_mut().for_each(|x| *x = f(*x)));
    }

    /// Combine element-wise with `other` in place: `self[i] = f(self[i], other[i])`.
    ///
    /// `other` may be a view of the same storage.
    pub fn zip_inplace(&self, other: &MirrorArray<T>, f: impl Fn(T, T) -> T) -> Result<()> {
        let expected = self.len();
        snafu::ensure!(other.len() == expected, LengthMismatchSnafu { expected, actual: other.len() });
        let rhs = other.to_vec();
        self.update(|data| data.iter_mut().zip(rhs).for_each(|(x, y)| *x = f(*x, y)));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coherence
    // ------------------------------------------------------------------

    /// Make `device` (or the session's default device) hold the current
    /// host contents, copying only if its copy is missing or stale.
    pub fn push_to_device(&self, device: Option<&DeviceInfo>, options: TransferOptions) -> Result<TransferOutcome> {
        let session = self.session();
        let Some(device) = session.target(device) else {
            return Ok(TransferOutcome::NoDevice);
        };
        let data = self.storage.data.borrow();
        session.engine().push(&mut self.state.borrow_mut(), &device, as_bytes(data.as_slice()), options)
    }

    /// Refresh the host storage in place from `device` (or the session's
    /// default device) if the host has diverged.
    ///
    /// Fails with [`Error::MissingBuffer`](crate::Error::MissingBuffer) if nothing was ever pushed there.
    pub fn pull_to_host(&self, device: Option<&DeviceInfo>, options: TransferOptions) -> Result<TransferOutcome> {
        let session = self.session();
        let Some(device) = session.target(device) else {
            return Ok(TransferOutcome::NoDevice);
        };
        let mut data = self.storage.data.borrow_mut();
        session.engine().pull(&mut self.state.borrow_mut(), &device, as_bytes_mut(data.as_mut_slice()), options)
    }

    /// Device buffer currently mirroring this storage on `device`, if any.
    pub fn device_buffer(&self, device: Option<&DeviceInfo>) -> Option<DeviceBuffer> {
        let device = self.session().target(device)?;
        self.state.borrow().buffer(device.id).cloned()
    }

    /// Block until every deferred transfer of this storage completes.
    pub fn wait_all(&self) -> Result<()> {
        self.state.borrow_mut().wait_all()
    }

    /// Record that `device`'s buffer was written outside this protocol.
    pub fn mark_device_mutated(&self, device: Option<&DeviceInfo>) -> Result<()> {
        match self.session().target(device) {
            Some(device) => self.state.borrow_mut().mark_device_mutated(device.id),
            None => Ok(()),
        }
    }

    /// Drop the buffer held on `device`. Returns whether there was one.
    pub fn release_device(&self, device: Option<&DeviceInfo>) -> bool {
        match self.session().target(device) {
            Some(device) => self.state.borrow_mut().release_device(device.id),
            None => false,
        }
    }

    pub fn is_dirty(&self, location: Location) -> bool {
        self.state.borrow().is_dirty(location)
    }

    pub fn is_copied(&self, location: Location) -> bool {
        self.state.borrow().is_copied(location)
    }

    pub fn pending_transfers(&self) -> usize {
        self.state.borrow().pending_transfers()
    }

    /// Borrow the shared coherence state.
    pub fn coherence(&self) -> Ref<'_, CoherenceState> {
        self.state.borrow()
    }

    /// Whether `other` shares this array's coherence state object.
    pub fn shares_state(&self, other: &MirrorArray<T>) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<T: HasDType> Clone for MirrorArray<T> {
    fn clone(&self) -> Self {
        self.view()
    }
}

impl<T: HasDType> fmt::Debug for MirrorArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorArray")
            .field("dtype", &T::DTYPE)
            .field("shape", &self.shape.as_slice())
            .field("offset", &self.offset)
            .field("data", &self.to_vec())
            .finish()
    }
}

impl<T: HasDType> PartialEq<[T]> for MirrorArray<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.with_host(|data| data == other)
    }
}
