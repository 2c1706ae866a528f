//! Transport seam between a session and the BLE stack.
//!
//! [`Transport`] covers the two GATT operations a session needs. The crate
//! ships a `btleplug` implementation in
//! [`CharacteristicHandler`](crate::ble::CharacteristicHandler); hosts with
//! their own BLE stack implement the trait themselves.

use async_trait::async_trait;
use std::sync::Arc;

use crate::ble::advertising::CharacteristicDescriptor;
use crate::error::Result;

/// Callback invoked with the payload of every notification.
///
/// May be called from any task, possibly concurrently.
pub type NotificationCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// GATT operations used by a session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enable notifications on `characteristic` and deliver each payload to
    /// `callback`.
    async fn subscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
        callback: NotificationCallback,
    ) -> Result<()>;

    /// Write `data` to `characteristic`.
    ///
    /// `with_response` requests a write acknowledgment from the peripheral.
    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn subscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
        callback: NotificationCallback,
    ) -> Result<()> {
        (**self).subscribe(characteristic, callback).await
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        (**self).write(characteristic, data, with_response).await
    }
}
