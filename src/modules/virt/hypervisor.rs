//! The hypervisor operations the virt module needs

use async_trait::async_trait;
use tokio::sync::broadcast;
use virt_rpc::{Domain, DomainState, Libvirt, LifecycleEvent, VirtError};

#[async_trait]
pub trait Hypervisor: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Domain, VirtError>;
    async fn state(&self, dom: &Domain) -> Result<DomainState, VirtError>;
    async fn start(&self, dom: &Domain) -> Result<(), VirtError>;
    async fn shutdown(&self, dom: &Domain) -> Result<(), VirtError>;
    async fn resume(&self, dom: &Domain) -> Result<(), VirtError>;
    async fn wake(&self, dom: &Domain) -> Result<(), VirtError>;
    /// Lifecycle events for every domain
    async fn lifecycle_events(&self) -> Result<broadcast::Receiver<LifecycleEvent>, VirtError>;
    async fn disconnect(&self) -> Result<(), VirtError>;
    /// The connection is gone and calls can only fail
    fn is_closed(&self) -> bool;
}

#[async_trait]
impl Hypervisor for Libvirt {
    async fn lookup(&self, name: &str) -> Result<Domain, VirtError> {
        self.domain_lookup_by_name(name).await
    }

    async fn state(&self, dom: &Domain) -> Result<DomainState, VirtError> {
        self.domain_get_state(dom).await.map(|(state, _reason)| state)
    }

    async fn start(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_create(dom).await
    }

    async fn shutdown(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_shutdown(dom).await
    }

    async fn resume(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_resume(dom).await
    }

    async fn wake(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_pm_wakeup(dom).await
    }

    async fn lifecycle_events(&self) -> Result<broadcast::Receiver<LifecycleEvent>, VirtError> {
        Libvirt::lifecycle_events(self).await
    }

    async fn disconnect(&self) -> Result<(), VirtError> {
        Libvirt::disconnect(self).await
    }

    fn is_closed(&self) -> bool {
        Libvirt::is_closed(self)
    }
}
