//! 直接命令队列与 fence

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{WaitForSingleObject, INFINITE};

use super::command::Dx12CommandList;
use super::{command_error, Dx12Backend};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::CommandQueue;
use crate::renderer::sync::FenceValue;

pub struct Dx12Queue {
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    event: HANDLE,
}

// 命令队列与 fence 是自由线程对象；事件句柄只在 wait_for 中使用
unsafe impl Send for Dx12Queue {}

impl Dx12Queue {
    pub(crate) fn new(queue: ID3D12CommandQueue, fence: ID3D12Fence, event: HANDLE) -> Self {
        Self { queue, fence, event }
    }

    pub(crate) fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl CommandQueue<Dx12Backend> for Dx12Queue {
    fn execute(&self, list: &Dx12CommandList) -> Result<()> {
        let list: ID3D12CommandList = list.raw().cast().map_err(command_error("cast command list"))?;
        // SAFETY: 命令列表已关闭
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn signal(&self, value: FenceValue) -> Result<()> {
        // SAFETY: fence 属于同一设备
        unsafe { self.queue.Signal(&self.fence, value.value()) }.map_err(command_error("Signal"))
    }

    fn completed_value(&self) -> FenceValue {
        // SAFETY: fence 有效
        FenceValue::new(unsafe { self.fence.GetCompletedValue() })
    }

    fn wait_for(&self, value: FenceValue) -> Result<()> {
        if self.completed_value() >= value {
            return Ok(());
        }

        // SAFETY: 事件句柄在 self 生命周期内有效
        unsafe {
            self.fence
                .SetEventOnCompletion(value.value(), self.event)
                .map_err(command_error("SetEventOnCompletion"))?;
            if WaitForSingleObject(self.event, INFINITE) != WAIT_OBJECT_0 {
                return Err(GraphicsError::CommandExecution(format!(
                    "waiting for fence {} failed",
                    value.value()
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl Drop for Dx12Queue {
    fn drop(&mut self) {
        // SAFETY: 事件由 CreateEventW 创建，只关闭一次
        if let Err(e) = unsafe { CloseHandle(self.event) } {
            tracing::warn!(error = %e, "Failed to close fence event");
        }
    }
}
