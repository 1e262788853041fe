//! 描述符堆管理
//!
//! 每个描述符堆是一个线性（bump）分配器：从第一个空闲槽开始连续分配，
//! 不支持单独释放。RTV / DSV 堆只有 CPU 句柄；CBV/SRV/UAV 与采样器堆
//! 同时返回 GPU 句柄。
//!
//! 容量不足时 `allocate` 返回 `DescriptorHeapExhausted`，绝不返回部分范围。
//! 需要更大的堆时，在 GPU 空闲后调用 `recreate` 整体替换。

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{Backend, Device, NativeDescriptorHeap, NativeHeapDesc};
use crate::renderer::sync::GpuIdle;

pub use crate::gfx::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};

/// 描述符句柄对（CPU + GPU）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandle {
    /// CPU 可见句柄
    pub cpu: CpuDescriptorHandle,
    /// GPU 可见句柄（仅对着色器可见的堆有效）
    pub gpu: Option<GpuDescriptorHandle>,
}

impl DescriptorHandle {
    /// 偏移句柄对
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            cpu: self.cpu.offset(count, increment_size),
            gpu: self.gpu.map(|g| g.offset(count, increment_size)),
        }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorHeapStats {
    pub name: String,
    pub heap_type: DescriptorHeapType,
    pub capacity: u32,
    pub used: u32,
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    fn new(name: &str, heap_type: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            name: name.to_string(),
            heap_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 线性分配的描述符堆
pub struct DescriptorHeap<B: Backend> {
    name: String,
    heap: B::DescriptorHeap,
    /// 下一个空闲槽
    next_free: u32,
}

impl<B: Backend> DescriptorHeap<B> {
    pub fn create(
        device: &B::Device,
        name: &str,
        heap_type: DescriptorHeapType,
        max_count: u32,
    ) -> Result<Self> {
        let heap = device.create_descriptor_heap(&NativeHeapDesc {
            heap_type,
            capacity: max_count,
            name: name.to_string(),
        })?;

        tracing::debug!(
            heap = name,
            heap_type = heap_type.name(),
            capacity = max_count,
            "Descriptor heap created"
        );

        Ok(Self {
            name: name.to_string(),
            heap,
            next_free: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap.heap_type()
    }

    pub fn capacity(&self) -> u32 {
        self.heap.capacity()
    }

    pub fn increment_size(&self) -> u32 {
        self.heap.increment_size()
    }

    pub fn allocated(&self) -> u32 {
        self.next_free
    }

    /// 底层原生堆，用于 `set_descriptor_heaps`
    pub fn native(&self) -> &B::DescriptorHeap {
        &self.heap
    }

    pub fn has_available_space(&self, count: u32) -> bool {
        self.capacity() - self.next_free >= count
    }

    /// 连续分配 `count` 个描述符，返回第一个的句柄
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorHandle> {
        if count == 0 || !self.has_available_space(count) {
            return Err(GraphicsError::DescriptorHeapExhausted {
                heap: self.name.clone(),
                requested: count,
                available: self.capacity() - self.next_free,
            }
            .into());
        }

        let handle = self.handle_at(self.next_free);
        self.next_free += count;
        Ok(handle)
    }

    /// 第 `index` 个描述符的句柄（不检查是否已分配）
    pub fn handle_at(&self, index: u32) -> DescriptorHandle {
        let increment = self.increment_size();
        DescriptorHandle {
            cpu: self.heap.cpu_start().offset(index, increment),
            gpu: self.heap.gpu_start().map(|g| g.offset(index, increment)),
        }
    }

    /// 句柄在堆中的下标
    pub fn offset_of(&self, handle: &DescriptorHandle) -> u32 {
        let start = self.heap.cpu_start().ptr;
        ((handle.cpu.ptr - start) / self.increment_size() as usize) as u32
    }

    /// 句柄是否属于本堆且已被分配
    pub fn validate_handle(&self, handle: &DescriptorHandle) -> bool {
        let start = self.heap.cpu_start().ptr;
        let increment = self.increment_size() as usize;
        if handle.cpu.ptr < start || (handle.cpu.ptr - start) % increment != 0 {
            return false;
        }

        let index = self.offset_of(handle);
        if index >= self.next_free {
            return false;
        }

        match (handle.gpu, self.heap.gpu_start()) {
            (Some(gpu), Some(gpu_start)) => gpu == gpu_start.offset(index, self.increment_size()),
            (None, None) => true,
            _ => false,
        }
    }

    /// 用更大的堆替换当前堆；之前分配的所有句柄失效，分配从 0 重新开始
    pub fn recreate(&mut self, device: &B::Device, _idle: &GpuIdle, new_capacity: u32) -> Result<()> {
        let heap_type = self.heap_type();
        self.heap = device.create_descriptor_heap(&NativeHeapDesc {
            heap_type,
            capacity: new_capacity,
            name: self.name.clone(),
        })?;
        self.next_free = 0;

        tracing::info!(heap = %self.name, capacity = new_capacity, "Descriptor heap recreated");
        Ok(())
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(&self.name, self.heap_type(), self.capacity(), self.next_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{CompletionMode, HeadlessBackend, HeadlessInstance, DESCRIPTOR_INCREMENT};
    use crate::gfx::Instance;

    fn device() -> <HeadlessBackend as Backend>::Device {
        HeadlessInstance::with_mode(CompletionMode::OnWait)
            .create_device(0, crate::gfx::FeatureLevel::Level12_0)
            .unwrap()
    }

    #[test]
    fn test_bump_allocation_is_contiguous() {
        let device = device();
        let mut heap =
            DescriptorHeap::<HeadlessBackend>::create(&device, "cbv", DescriptorHeapType::CbvSrvUav, 8).unwrap();

        let a = heap.allocate(3).unwrap();
        let b = heap.allocate(2).unwrap();
        assert_eq!(heap.offset_of(&a), 0);
        assert_eq!(heap.offset_of(&b), 3);
        assert_eq!(b.cpu.ptr - a.cpu.ptr, 3 * DESCRIPTOR_INCREMENT as usize);
        assert!(a.gpu.is_some());
        assert_eq!(heap.stats().used, 5);
    }

    #[test]
    fn test_exhaustion_returns_no_partial_range() {
        let device = device();
        let mut heap =
            DescriptorHeap::<HeadlessBackend>::create(&device, "rtv", DescriptorHeapType::Rtv, 4).unwrap();

        heap.allocate(3).unwrap();
        assert!(!heap.has_available_space(2));
        let err = heap.allocate(2).unwrap_err();
        assert!(err.to_string().contains("exhausted"));
        assert_eq!(heap.allocated(), 3);
        assert!(heap.allocate(1).is_ok());
    }

    #[test]
    fn test_rtv_heap_has_no_gpu_handles() {
        let device = device();
        let mut heap =
            DescriptorHeap::<HeadlessBackend>::create(&device, "rtv", DescriptorHeapType::Rtv, 2).unwrap();
        let handle = heap.allocate(1).unwrap();
        assert!(handle.gpu.is_none());
        assert!(heap.validate_handle(&handle));
    }

    #[test]
    fn test_validate_handle() {
        let device = device();
        let mut heap =
            DescriptorHeap::<HeadlessBackend>::create(&device, "cbv", DescriptorHeapType::CbvSrvUav, 4).unwrap();
        let other =
            DescriptorHeap::<HeadlessBackend>::create(&device, "other", DescriptorHeapType::CbvSrvUav, 4).unwrap();

        let handle = heap.allocate(1).unwrap();
        assert!(heap.validate_handle(&handle));
        // 未分配的槽
        assert!(!heap.validate_handle(&heap.handle_at(2)));
        // 其他堆的句柄
        assert!(!heap.validate_handle(&other.handle_at(0)));
    }
}
