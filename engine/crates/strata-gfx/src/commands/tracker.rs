use crate::{backend::DeviceBackend, basic::error::GfxResult};

/// 等待 GPU 用完之后才能释放的 native 对象
pub enum PendingDestroy<D: DeviceBackend> {
    Buffer(D::Buffer),
    Texture(D::Texture),
    Sampler(D::Sampler),
    Pipeline(D::Pipeline),
    DescriptorSet(D::DescriptorSet),
    CommandBuffer(D::CommandBuffer),
    Semaphore(D::Semaphore),
}

impl<D: DeviceBackend> PendingDestroy<D> {
    fn release(self, backend: &mut D) {
        match self {
            PendingDestroy::Buffer(buffer) => backend.destroy_buffer(buffer),
            PendingDestroy::Texture(texture) => backend.destroy_texture(texture),
            PendingDestroy::Sampler(sampler) => backend.destroy_sampler(sampler),
            PendingDestroy::Pipeline(pipeline) => backend.destroy_pipeline(pipeline),
            PendingDestroy::DescriptorSet(set) => backend.destroy_descriptor_set(set),
            PendingDestroy::CommandBuffer(cmd) => backend.destroy_command_buffer(cmd),
            PendingDestroy::Semaphore(semaphore) => backend.destroy_semaphore(semaphore),
        }
    }
}

/// 跟踪所有在途的提交，并管理延迟销毁
///
/// 每次提交分配一个递增的 serial 和一个内部 fence。
/// 销毁资源时用当前最新的 serial 标记 native 对象，等所有不晚于这个 serial 的提交完成后再释放。
pub struct SubmissionTracker<D: DeviceBackend> {
    next_serial: u64,
    /// 按 serial 递增排列
    in_flight: Vec<(u64, D::Fence)>,
    pending_destroy: Vec<(u64, PendingDestroy<D>)>,
}

impl<D: DeviceBackend> Default for SubmissionTracker<D> {
    fn default() -> Self {
        Self {
            next_serial: 1,
            in_flight: Vec::new(),
            pending_destroy: Vec::new(),
        }
    }
}

// getters
impl<D: DeviceBackend> SubmissionTracker<D> {
    /// 最近一次提交的 serial，0 表示还没有提交过
    #[inline]
    pub fn last_submitted(&self) -> u64 {
        self.next_serial - 1
    }

    #[inline]
    pub fn next_serial(&self) -> u64 {
        self.next_serial
    }

    /// low-water mark：这个 serial 及之前的提交都已经完成
    #[inline]
    pub fn completed(&self) -> u64 {
        self.in_flight.first().map_or(self.last_submitted(), |(serial, _)| serial - 1)
    }

    #[inline]
    pub fn is_retired(&self, serial: u64) -> bool {
        serial <= self.last_submitted() && self.in_flight.iter().all(|(s, _)| *s != serial)
    }

    #[inline]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }
}

// tools
impl<D: DeviceBackend> SubmissionTracker<D> {
    /// 登记一次已经交给 queue 的提交，返回它的 serial
    pub fn push(&mut self, fence: D::Fence) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.in_flight.push((serial, fence));
        serial
    }

    /// 在最近一次提交完成后释放
    pub fn defer(&mut self, object: PendingDestroy<D>) {
        let serial = self.last_submitted();
        self.defer_until(serial, object);
    }

    /// 在指定 serial 完成后释放
    pub fn defer_until(&mut self, serial: u64, object: PendingDestroy<D>) {
        self.pending_destroy.push((serial, object));
    }

    /// 不阻塞地检查在途的 fence，回收已完成的提交，释放到期的对象
    pub fn retire(&mut self, backend: &mut D) -> GfxResult<()> {
        let mut still_in_flight = Vec::with_capacity(self.in_flight.len());
        let mut first_err = None;
        for (serial, fence) in self.in_flight.drain(..) {
            match backend.fence_signaled(&fence) {
                Ok(true) => {
                    log::debug!("submission #{serial} retired");
                    backend.destroy_fence(fence);
                }
                Ok(false) => still_in_flight.push((serial, fence)),
                Err(err) => {
                    first_err.get_or_insert(err);
                    still_in_flight.push((serial, fence));
                }
            }
        }
        self.in_flight = still_in_flight;

        self.release_completed(backend);
        first_err.map_or(Ok(()), Err)
    }

    /// 阻塞等待指定的提交完成
    pub fn wait(&mut self, backend: &mut D, serial: u64) -> GfxResult<()> {
        if let Some((_, fence)) = self.in_flight.iter().find(|(s, _)| *s == serial) {
            backend.wait_fence(fence)?;
        }
        self.retire(backend)
    }

    /// 等待 device 空闲，之后所有提交都已完成，所有延迟对象都可以释放
    pub fn wait_idle(&mut self, backend: &mut D) -> GfxResult<()> {
        backend.wait_idle()?;
        self.release_all(backend);
        Ok(())
    }

    /// 无条件释放全部对象，调用前 device 必须已经空闲
    pub fn release_all(&mut self, backend: &mut D) {
        for (_, fence) in self.in_flight.drain(..) {
            backend.destroy_fence(fence);
        }
        for (_, object) in self.pending_destroy.drain(..) {
            object.release(backend);
        }
    }

    fn release_completed(&mut self, backend: &mut D) {
        let completed = self.completed();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            self.pending_destroy.drain(..).partition(|(serial, _)| *serial <= completed);
        self.pending_destroy = waiting;
        if !ready.is_empty() {
            log::debug!("releasing {} deferred objects (completed serial {completed})", ready.len());
        }
        for (_, object) in ready {
            object.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::headless::{HeadlessDevice, test_device},
        foundation::info::DescriptorPoolSizes,
        resources::buffer::{BufferInfo, BufferType},
    };

    /// 提交一个空的 command buffer，返回已经 signal 的 fence
    fn submitted_fence(device: &mut HeadlessDevice) -> <HeadlessDevice as DeviceBackend>::Fence {
        let queue = device.queues()[0];
        let mut cmd = device.create_command_buffer(&queue).unwrap();
        device.begin_command_buffer(&mut cmd).unwrap();
        device.end_command_buffer(&mut cmd).unwrap();
        let fence = device.create_fence().unwrap();
        device.submit(&queue, &cmd, None, None, &fence).unwrap();
        device.destroy_command_buffer(cmd);
        fence
    }

    #[test]
    fn deferred_object_waits_for_its_serial() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let mut tracker = SubmissionTracker::<HeadlessDevice>::default();
        assert_eq!(tracker.last_submitted(), 0);

        // 从未 signal 的 fence 代表一次还没完成的提交
        let pending = device.create_fence().unwrap();
        let first = tracker.push(pending);
        let buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 16)).unwrap();
        tracker.defer(PendingDestroy::Buffer(buffer));

        tracker.retire(&mut device).unwrap();
        assert_eq!(tracker.pending_destroy_count(), 1);
        assert_eq!(device.stats().buffers, 1);
        assert!(!tracker.is_retired(first));
        assert_eq!(tracker.completed(), 0);
    }

    #[test]
    fn low_water_mark_holds_later_objects() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let mut tracker = SubmissionTracker::<HeadlessDevice>::default();

        let first = tracker.push(device.create_fence().unwrap());
        let fence = submitted_fence(&mut device);
        let second = tracker.push(fence);
        let buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 16)).unwrap();
        tracker.defer_until(second, PendingDestroy::Buffer(buffer));

        tracker.retire(&mut device).unwrap();
        assert!(tracker.is_retired(second));
        assert!(!tracker.is_retired(first));
        assert_eq!(tracker.in_flight_count(), 1);
        // 更早的提交还没完成，对象不能释放
        assert_eq!(tracker.pending_destroy_count(), 1);
    }

    #[test]
    fn completed_submission_releases_objects() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let mut tracker = SubmissionTracker::<HeadlessDevice>::default();

        let fence = submitted_fence(&mut device);
        let serial = tracker.push(fence);
        let buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 16)).unwrap();
        tracker.defer(PendingDestroy::Buffer(buffer));

        tracker.wait(&mut device, serial).unwrap();
        assert_eq!(tracker.completed(), serial);
        assert_eq!(tracker.pending_destroy_count(), 0);
        assert_eq!(device.stats().buffers, 0);
        assert_eq!(device.stats().fences, 0);
    }

    #[test]
    fn release_all_drops_everything() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let mut tracker = SubmissionTracker::<HeadlessDevice>::default();
        tracker.push(device.create_fence().unwrap());
        let buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 16)).unwrap();
        tracker.defer(PendingDestroy::Buffer(buffer));

        tracker.release_all(&mut device);
        assert_eq!(tracker.in_flight_count(), 0);
        assert_eq!(tracker.pending_destroy_count(), 0);
        assert_eq!(device.stats().buffers, 0);
        assert_eq!(device.stats().fences, 0);
    }
}
