/// A small integer index into an [Arena]. Typed so a handle to one kind of node can't be used to
/// look up another.
pub struct Handle<T>(usize, std::marker::PhantomData<T>);

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.0).finish()
    }
}

impl<T> Handle<T> {
    pub fn raw(id: usize) -> Self {
        Self(id, std::marker::PhantomData)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Append-only storage. Handles are insertion indices and stay valid for the lifetime of the
/// arena.
pub struct Arena<T> {
    storage: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { storage: vec![] }
    }
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        let id = self.storage.len();
        self.storage.push(value);
        Handle(id, std::marker::PhantomData::<T>)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.storage.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.storage.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.storage
            .iter()
            .enumerate()
            .map(|(id, value)| (Handle::raw(id), value))
    }
}

impl<T> std::ops::Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &Self::Output {
        &self.storage[handle.0]
    }
}

impl<T> std::ops::IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut Self::Output {
        &mut self.storage[handle.0]
    }
}
