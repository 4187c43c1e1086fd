use slotmap::SlotMap;

use crate::{
    basic::error::{GfxError, GfxResult},
    resources::handles::{DeviceHandle, ResourceHandle},
};

/// 单个 device 上某一类资源的 handle 表
///
/// 表记住自己属于哪个 device，别的 device 的 handle 一律视为不存在。
pub struct ResourceTable<H: ResourceHandle, V> {
    device: DeviceHandle,
    slots: SlotMap<H::Key, V>,
}

// 创建与销毁
impl<H: ResourceHandle, V> ResourceTable<H, V> {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            slots: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, value: V) -> H {
        let key = self.slots.insert(value);
        H::from_parts(self.device, key)
    }

    /// 移除并返回表项；handle 从此失效
    pub fn remove(&mut self, handle: H) -> Option<V> {
        if handle.device() != self.device {
            return None;
        }
        self.slots.remove(handle.key())
    }

    /// 取出所有表项，用于 device 销毁
    pub fn drain(&mut self) -> impl Iterator<Item = (H, V)> + '_ {
        let device = self.device;
        self.slots.drain().map(move |(key, value)| (H::from_parts(device, key), value))
    }
}

// getters
impl<H: ResourceHandle, V> ResourceTable<H, V> {
    #[inline]
    pub fn get(&self, handle: H) -> Option<&V> {
        if handle.device() != self.device {
            return None;
        }
        self.slots.get(handle.key())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: H) -> Option<&mut V> {
        if handle.device() != self.device {
            return None;
        }
        self.slots.get_mut(handle.key())
    }

    /// 和 `get` 相同，但是不存在时返回 `InvalidHandle`
    #[inline]
    pub fn require(&self, handle: H) -> GfxResult<&V> {
        self.get(handle).ok_or(GfxError::invalid(H::KIND))
    }

    #[inline]
    pub fn require_mut(&mut self, handle: H) -> GfxResult<&mut V> {
        self.get_mut(handle).ok_or(GfxError::invalid(H::KIND))
    }

    #[inline]
    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = H> + '_ {
        self.slots.keys().map(|key| H::from_parts(self.device, key))
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::resources::handles::{BufferHandle, HandleKind};

    fn two_devices() -> (DeviceHandle, DeviceHandle) {
        let mut devices = SlotMap::<DeviceHandle, ()>::with_key();
        (devices.insert(()), devices.insert(()))
    }

    #[test]
    fn stale_handle_is_not_found_after_slot_reuse() {
        let (device, _) = two_devices();
        let mut table = ResourceTable::<BufferHandle, u32>::new(device);

        let first = table.insert(1);
        assert_eq!(table.remove(first), Some(1));

        // slot 被复用，但是旧 handle 不会指向新资源
        let second = table.insert(2);
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&2));
        assert_eq!(table.remove(first), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn foreign_device_handle_is_rejected() {
        let (device_a, device_b) = two_devices();
        let mut table_a = ResourceTable::<BufferHandle, u32>::new(device_a);
        let mut table_b = ResourceTable::<BufferHandle, u32>::new(device_b);

        let handle_b = table_b.insert(7);
        let _handle_a = table_a.insert(3);

        assert_eq!(table_a.get(handle_b), None);
        assert_eq!(table_a.require(handle_b), Err(GfxError::invalid(HandleKind::Buffer)));
        assert_eq!(table_a.remove(handle_b), None);
        assert_eq!(table_b.get(handle_b), Some(&7));
    }

    #[test]
    fn drain_empties_table() {
        let (device, _) = two_devices();
        let mut table = ResourceTable::<BufferHandle, u32>::new(device);
        let h = table.insert(5);
        table.insert(6);

        let drained: Vec<_> = table.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().any(|(handle, v)| *handle == h && *v == 5));
        assert!(table.is_empty());
    }
}
