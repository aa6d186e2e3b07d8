// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-workload service containers.
//!
//! A producer may attach a type-keyed container of services to a workload;
//! the payload retrieves them through its
//! [`WorkloadContext`](crate::workload::WorkloadContext) (or via
//! [`crate::worker::current_services`] from code that cannot see the
//! context). The engine stores the container opaquely and releases it on
//! the terminal transition.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>, ahash::RandomState>;

/// A type-keyed bag of shared services.
#[derive(Default)]
pub struct ServiceContainer {
    services: ServiceMap,
}

impl Debug for ServiceContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.services.len())
            .finish()
    }
}

impl ServiceContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.insert(Arc::new(service));
        self
    }

    /// Register a service under its type. A later insertion of the same
    /// type replaces the earlier one.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// Fetch the service registered under `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    struct Clock(&'static str);
    struct Budget(u32);

    #[test]
    fn services_are_keyed_by_type() {
        let container = ServiceContainer::new()
            .with(Clock("utc"))
            .with(Budget(1000));
        assert_eq!(container.len(), 2);
        assert_eq!(container.get::<Clock>().unwrap().0, "utc");
        assert_eq!(container.get::<Budget>().unwrap().0, 1000);
        assert!(container.get::<String>().is_none());
    }

    #[test]
    fn reinsertion_replaces() {
        let mut container = ServiceContainer::new().with(Budget(1));
        container.insert(Arc::new(Budget(2)));
        assert_eq!(container.len(), 1);
        assert_eq!(container.get::<Budget>().unwrap().0, 2);
    }
}
