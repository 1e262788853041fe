//! 叠加层纹理
//!
//! 游戏线程随快照发送纹理的创建、局部更新与释放（egui 字体图集就是这样到达的），
//! 渲染器在录制通道之前把像素经本帧槽的暂存上传缓冲区拷进默认堆纹理。
//!
//! - 窗口最小化时更新保留在队列里，直到下一次真正录制的帧；
//! - 被替换或释放的纹理先退役，覆盖其最后一次使用的 fence 完成后才析构；
//! - 每个帧槽在着色器可见堆里有 `MAX_OVERLAY_TEXTURES` 个 SRV，每帧重写，
//!   第 0 个总是内置的 1x1 白色纹理。

use std::collections::HashMap;

use crate::core::error::Result;
use crate::gfx::{
    Backend, CommandList, Device, TextureCopy, UploadMemory, TEXEL_SIZE, TEXTURE_PLACEMENT_ALIGNMENT,
};
use crate::renderer::constant_buffer::align_up;
use crate::renderer::descriptor::DescriptorHandle;
use crate::renderer::sync::FenceValue;

/// 每个帧槽一帧内最多绑定的纹理数
pub const MAX_OVERLAY_TEXTURES: u32 = 8;
/// 帧槽暂存缓冲区的初始大小，不够时按 2 的幂扩容
pub const INITIAL_STAGING_SIZE: u64 = 256 * 1024;

/// 叠加层纹理标识
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OverlayTextureId {
    /// 内置 1x1 白色纹理，纯色三角形使用它
    #[default]
    White,
    /// 游戏线程管理的纹理
    Managed(u64),
}

/// 纹理内容更新：RGBA8、预乘 alpha、按行紧凑排列
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayTextureUpdate {
    pub id: OverlayTextureId,
    /// `None` 表示整张替换，否则写入已有纹理的这个位置
    pub origin: Option<[u32; 2]>,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl OverlayTextureUpdate {
    fn white() -> Self {
        Self {
            id: OverlayTextureId::White,
            origin: None,
            width: 1,
            height: 1,
            pixels: vec![u8::MAX; TEXEL_SIZE as usize],
        }
    }

    fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() as u64 == u64::from(self.width) * u64::from(self.height) * TEXEL_SIZE
    }
}

struct ManagedTexture<B: Backend> {
    texture: B::Texture,
    width: u32,
    height: u32,
}

/// 已写入暂存缓冲区、等待录制的拷贝
#[derive(Debug, Clone, Copy)]
pub struct PendingCopy {
    id: OverlayTextureId,
    copy: TextureCopy,
}

/// 本帧 SRV 表的内容；下标即表内偏移
#[derive(Debug, Clone, PartialEq)]
pub struct TextureTable {
    slots: Vec<OverlayTextureId>,
}

impl TextureTable {
    /// 不在表里的纹理回退到白色（下标 0）
    pub fn index_of(&self, id: OverlayTextureId) -> u32 {
        self.slots.iter().position(|slot| *slot == id).unwrap_or(0) as u32
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// 渲染器持有的叠加层纹理集合
pub struct OverlayTextures<B: Backend> {
    live: HashMap<OverlayTextureId, ManagedTexture<B>>,
    pending: Vec<OverlayTextureUpdate>,
    /// 上一份快照释放的纹理；那一帧录制完之后才退役
    deferred_frees: Vec<OverlayTextureId>,
    retired: Vec<(FenceValue, B::Texture)>,
}

impl<B: Backend> Default for OverlayTextures<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> OverlayTextures<B> {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
            pending: Vec::new(),
            deferred_frees: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub fn contains(&self, id: OverlayTextureId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn extent(&self, id: OverlayTextureId) -> Option<(u32, u32)> {
        self.live.get(&id).map(|t| (t.width, t.height))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// 接收一份快照里的更新和释放
    ///
    /// `last_issued` 覆盖之前所有提交；上一份快照释放的纹理以它为退役 fence。
    pub fn enqueue(&mut self, updates: &[OverlayTextureUpdate], frees: &[OverlayTextureId], last_issued: FenceValue) {
        for id in std::mem::take(&mut self.deferred_frees) {
            self.pending.retain(|update| update.id != id);
            if let Some(old) = self.live.remove(&id) {
                tracing::debug!(texture = ?id, fence = last_issued.value(), "Overlay texture retired");
                self.retired.push((last_issued, old.texture));
            }
        }

        self.pending.extend(updates.iter().cloned());
        self.deferred_frees
            .extend(frees.iter().copied().filter(|id| *id != OverlayTextureId::White));
    }

    /// 析构 GPU 已经用完的退役纹理
    pub fn release_completed(&mut self, completed: FenceValue) {
        let before = self.retired.len();
        self.retired.retain(|(fence, _)| *fence > completed);
        let released = before - self.retired.len();
        if released > 0 {
            tracing::trace!(released, completed = completed.value(), "Retired overlay textures released");
        }
    }

    /// 为待处理的更新创建纹理并写入暂存缓冲区，返回要录制的拷贝
    ///
    /// 暂存缓冲区属于刚取得租约的帧槽，GPU 已不再读取它。
    pub fn prepare(
        &mut self,
        device: &B::Device,
        staging: &mut B::UploadBuffer,
        slot: usize,
        last_issued: FenceValue,
    ) -> Result<Vec<PendingCopy>> {
        if !self.contains(OverlayTextureId::White) && !self.pending.iter().any(|u| u.id == OverlayTextureId::White) {
            self.pending.insert(0, OverlayTextureUpdate::white());
        }
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut placed = Vec::with_capacity(self.pending.len());
        let mut end = 0u64;
        for update in std::mem::take(&mut self.pending) {
            if !update.is_well_formed() {
                tracing::warn!(
                    texture = ?update.id,
                    width = update.width,
                    height = update.height,
                    bytes = update.pixels.len(),
                    "Malformed overlay texture update dropped"
                );
                continue;
            }
            let [x, y] = update.origin.unwrap_or([0, 0]);
            let copy = TextureCopy {
                source_offset: align_up(end, TEXTURE_PLACEMENT_ALIGNMENT),
                row_pitch: TextureCopy::pitch_for(update.width),
                x,
                y,
                width: update.width,
                height: update.height,
            };
            end = copy.source_offset + copy.source_size();
            placed.push((update, copy));
        }

        if end > staging.size() {
            let size = end.next_power_of_two();
            *staging = device.create_upload_buffer(size, &format!("frame {slot} texture staging"))?;
            tracing::debug!(slot, size, "Texture staging buffer grown");
        }

        let mut copies: Vec<PendingCopy> = Vec::with_capacity(placed.len());
        for (update, copy) in placed {
            match self.ensure_texture(device, &update, last_issued)? {
                Target::Skip => continue,
                // 新纹理替换旧纹理时，之前排给旧纹理的拷贝作废
                Target::Replaced => copies.retain(|pending| pending.id != update.id),
                Target::Existing => {}
            }
            write_rows(staging, &update, &copy)?;
            copies.push(PendingCopy { id: update.id, copy });
        }
        Ok(copies)
    }

    fn ensure_texture(
        &mut self,
        device: &B::Device,
        update: &OverlayTextureUpdate,
        last_issued: FenceValue,
    ) -> Result<Target> {
        if let Some([x, y]) = update.origin {
            let Some(existing) = self.live.get(&update.id) else {
                tracing::warn!(texture = ?update.id, "Partial update for unknown overlay texture dropped");
                return Ok(Target::Skip);
            };
            let fits = u64::from(x) + u64::from(update.width) <= u64::from(existing.width)
                && u64::from(y) + u64::from(update.height) <= u64::from(existing.height);
            if !fits {
                tracing::warn!(
                    texture = ?update.id,
                    x,
                    y,
                    width = update.width,
                    height = update.height,
                    "Partial overlay texture update out of bounds, dropped"
                );
                return Ok(Target::Skip);
            }
            return Ok(Target::Existing);
        }

        if self.extent(update.id) == Some((update.width, update.height)) {
            return Ok(Target::Existing);
        }

        let texture = device.create_texture(update.width, update.height, &format!("overlay texture {:?}", update.id))?;
        let replaced = self.live.insert(
            update.id,
            ManagedTexture {
                texture,
                width: update.width,
                height: update.height,
            },
        );
        tracing::debug!(texture = ?update.id, width = update.width, height = update.height, "Overlay texture created");
        match replaced {
            Some(old) => {
                self.retired.push((last_issued, old.texture));
                Ok(Target::Replaced)
            }
            None => Ok(Target::Existing),
        }
    }

    /// 在通道之前录制拷贝
    pub fn record_copies(&mut self, list: &mut B::CommandList, staging: &B::UploadBuffer, copies: &[PendingCopy]) {
        for pending in copies {
            if let Some(entry) = self.live.get_mut(&pending.id) {
                list.copy_to_texture(&mut entry.texture, staging, pending.copy);
            }
        }
    }

    /// 把本帧用到的纹理写进帧槽的 SRV 表
    pub fn write_table(
        &self,
        device: &B::Device,
        table: DescriptorHandle,
        increment: u32,
        used: impl IntoIterator<Item = OverlayTextureId>,
    ) -> TextureTable {
        let mut slots = Vec::new();
        let mut missing = Vec::new();
        let mut overflow = 0usize;

        for id in std::iter::once(OverlayTextureId::White).chain(used) {
            if slots.contains(&id) || missing.contains(&id) {
                continue;
            }
            let Some(entry) = self.live.get(&id) else {
                missing.push(id);
                continue;
            };
            if slots.len() as u32 == MAX_OVERLAY_TEXTURES {
                overflow += 1;
                continue;
            }
            device.create_shader_resource_view(&entry.texture, table.offset(slots.len() as u32, increment).cpu);
            slots.push(id);
        }

        if !missing.is_empty() {
            tracing::warn!(textures = ?missing, "Overlay meshes reference unknown textures, drawn with white");
        }
        if overflow > 0 {
            tracing::warn!(overflow, max = MAX_OVERLAY_TEXTURES, "Too many overlay textures in one frame, extras drawn with white");
        }
        TextureTable { slots }
    }
}

enum Target {
    Skip,
    Existing,
    Replaced,
}

/// 按对齐后的行距写入暂存缓冲区
fn write_rows<M: UploadMemory>(staging: &mut M, update: &OverlayTextureUpdate, copy: &TextureCopy) -> Result<()> {
    let row = update.width as usize * TEXEL_SIZE as usize;
    let pitch = copy.row_pitch as usize;
    if pitch == row {
        return staging.write(copy.source_offset, &update.pixels);
    }

    let mut padded = vec![0u8; copy.source_size() as usize];
    for (index, source) in update.pixels.chunks_exact(row).enumerate() {
        let start = index * pitch;
        padded[start..start + row].copy_from_slice(source);
    }
    staging.write(copy.source_offset, &padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{
        CompletionMode, GpuEvent, HeadlessBackend, HeadlessDevice, HeadlessInstance, DESCRIPTOR_INCREMENT,
    };
    use crate::gfx::{CommandQueue, DescriptorHeapType, FeatureLevel, Instance};
    use crate::renderer::descriptor::DescriptorHeap;

    type Textures = OverlayTextures<HeadlessBackend>;

    fn device() -> HeadlessDevice {
        HeadlessInstance::with_mode(CompletionMode::Manual)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap()
    }

    fn update(id: u64, origin: Option<[u32; 2]>, width: u32, height: u32) -> OverlayTextureUpdate {
        OverlayTextureUpdate {
            id: OverlayTextureId::Managed(id),
            origin,
            width,
            height,
            pixels: vec![0x7f; (width * height * 4) as usize],
        }
    }

    #[test]
    fn test_white_texture_is_created_first() {
        let device = device();
        let mut staging = device.create_upload_buffer(INITIAL_STAGING_SIZE, "staging").unwrap();
        let mut textures = Textures::new();
        textures.enqueue(&[update(0, None, 64, 8)], &[], FenceValue::ZERO);

        let copies = textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].id, OverlayTextureId::White);
        assert_eq!(copies[1].copy.source_offset % TEXTURE_PLACEMENT_ALIGNMENT, 0);
        assert_eq!(textures.extent(OverlayTextureId::Managed(0)), Some((64, 8)));
        assert_eq!(textures.pending_count(), 0);

        // 第二帧没有新的更新
        assert!(textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_padded_rows_land_at_pitch_offsets() {
        let device = device();
        let mut staging = device.create_upload_buffer(INITIAL_STAGING_SIZE, "staging").unwrap();
        let mut textures = Textures::new();
        let mut atlas = update(3, None, 3, 2);
        atlas.pixels = (0..24).collect();
        textures.enqueue(&[atlas], &[], FenceValue::ZERO);

        let copies = textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap();
        let copy = copies[1].copy;
        assert_eq!(copy.row_pitch, 256);
        let base = copy.source_offset as usize;
        assert_eq!(&staging.contents()[base..base + 12], &(0..12).collect::<Vec<u8>>()[..]);
        assert_eq!(&staging.contents()[base + 256..base + 268], &(12..24).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_staging_grows_for_large_updates() {
        let device = device();
        let mut staging = device.create_upload_buffer(1024, "staging").unwrap();
        let mut textures = Textures::new();
        textures.enqueue(&[update(0, None, 256, 256)], &[], FenceValue::ZERO);
        textures.prepare(&device, &mut staging, 1, FenceValue::ZERO).unwrap();
        assert!(staging.size() >= 256 * 256 * 4);
    }

    #[test]
    fn test_invalid_updates_are_dropped() {
        let device = device();
        let mut staging = device.create_upload_buffer(INITIAL_STAGING_SIZE, "staging").unwrap();
        let mut textures = Textures::new();
        let mut short = update(1, None, 4, 4);
        short.pixels.truncate(10);
        textures.enqueue(
            &[short, update(2, Some([0, 0]), 2, 2), update(3, None, 4, 4), update(3, Some([3, 3]), 2, 2)],
            &[],
            FenceValue::ZERO,
        );

        let copies = textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap();
        let ids: Vec<_> = copies.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![OverlayTextureId::White, OverlayTextureId::Managed(3)]);
        assert!(!textures.contains(OverlayTextureId::Managed(1)));
        assert!(!textures.contains(OverlayTextureId::Managed(2)));
    }

    #[test]
    fn test_replaced_and_freed_textures_wait_for_their_fence() {
        let device = device();
        let events = device.events();
        let queue = device.create_queue().unwrap();
        let mut staging = device.create_upload_buffer(INITIAL_STAGING_SIZE, "staging").unwrap();
        let mut textures = Textures::new();

        textures.enqueue(&[update(0, None, 4, 4), update(1, None, 2, 2)], &[], FenceValue::ZERO);
        textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap();

        // 尺寸变化：新建纹理，旧纹理退役到 fence 1
        textures.enqueue(&[update(0, None, 8, 8)], &[OverlayTextureId::Managed(1)], FenceValue::new(1));
        textures.prepare(&device, &mut staging, 0, FenceValue::new(1)).unwrap();
        assert_eq!(textures.retired_count(), 1);
        // 释放在下一份快照到达时才生效
        assert!(textures.contains(OverlayTextureId::Managed(1)));
        textures.enqueue(&[], &[], FenceValue::new(2));
        assert!(!textures.contains(OverlayTextureId::Managed(1)));
        assert_eq!(textures.retired_count(), 2);

        queue.signal(FenceValue::new(2)).unwrap();
        device.timeline().complete_up_to(1);
        textures.release_completed(queue.completed_value());
        assert_eq!(textures.retired_count(), 1);
        device.timeline().complete_up_to(2);
        textures.release_completed(queue.completed_value());
        assert_eq!(textures.retired_count(), 0);
        assert_eq!(events.count(|e| matches!(e, GpuEvent::TextureReleased { .. })), 2);
    }

    #[test]
    fn test_table_falls_back_to_white() {
        let device = device();
        let mut staging = device.create_upload_buffer(INITIAL_STAGING_SIZE, "staging").unwrap();
        let mut heap =
            DescriptorHeap::<HeadlessBackend>::create(&device, "srv", DescriptorHeapType::CbvSrvUav, 16).unwrap();
        let table = heap.allocate(MAX_OVERLAY_TEXTURES).unwrap();
        let mut textures = Textures::new();
        let updates: Vec<_> = (0..10).map(|i| update(i, None, 1, 1)).collect();
        textures.enqueue(&updates, &[], FenceValue::ZERO);
        textures.prepare(&device, &mut staging, 0, FenceValue::ZERO).unwrap();

        let used = (0..10).rev().map(OverlayTextureId::Managed).chain([OverlayTextureId::Managed(99)]);
        let written = textures.write_table(&device, table, DESCRIPTOR_INCREMENT, used);
        assert_eq!(written.len(), MAX_OVERLAY_TEXTURES as usize);
        assert_eq!(written.index_of(OverlayTextureId::White), 0);
        assert_eq!(written.index_of(OverlayTextureId::Managed(9)), 1);
        // 超出容量与未知的纹理都回退到白色
        assert_eq!(written.index_of(OverlayTextureId::Managed(0)), 0);
        assert_eq!(written.index_of(OverlayTextureId::Managed(99)), 0);
    }
}
