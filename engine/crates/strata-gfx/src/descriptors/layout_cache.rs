use std::collections::HashMap;

use itertools::Itertools;

use crate::{
    basic::error::GfxResult,
    descriptors::descriptor_set::{DescriptorBindingInfo, DescriptorSetInfo, DescriptorType},
};

/// layout cache 中的下标，在 device 生命周期内稳定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetLayoutId(u32);

impl DescriptorSetLayoutId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// cache 的 key：按声明顺序排列的 (type, count)
///
/// shader stage 不参与比较，只有 stage 不同的两个 binding 列表共享同一个 layout，
/// 以第一次插入时的 stage 为准。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LayoutKey(Vec<(DescriptorType, u32)>);

impl LayoutKey {
    fn new(info: &DescriptorSetInfo) -> Self {
        Self(info.bindings.iter().map(|b| (b.ty, b.count)).collect_vec())
    }
}

pub struct CachedLayout<L> {
    pub(crate) bindings: Vec<DescriptorBindingInfo>,
    pub(crate) native: L,
}

impl<L> CachedLayout<L> {
    #[inline]
    pub fn bindings(&self) -> &[DescriptorBindingInfo] {
        &self.bindings
    }

    #[inline]
    pub fn native(&self) -> &L {
        &self.native
    }
}

/// descriptor set layout 的去重缓存
///
/// 只增不减，device 销毁时统一释放。
pub struct DescriptorSetLayoutCache<L> {
    layouts: Vec<CachedLayout<L>>,
    lookup: HashMap<LayoutKey, DescriptorSetLayoutId>,
}

impl<L> Default for DescriptorSetLayoutCache<L> {
    fn default() -> Self {
        Self {
            layouts: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<L> DescriptorSetLayoutCache<L> {
    /// 命中时直接返回缓存的 id；未命中时调用 `create` 构建 native layout
    pub fn get_or_create(
        &mut self,
        info: &DescriptorSetInfo,
        create: impl FnOnce(&DescriptorSetInfo) -> GfxResult<L>,
    ) -> GfxResult<DescriptorSetLayoutId> {
        let key = LayoutKey::new(info);
        if let Some(id) = self.lookup.get(&key) {
            log::debug!("descriptor set layout cache hit: {:?}", key.0);
            return Ok(*id);
        }

        let native = create(info)?;
        let id = DescriptorSetLayoutId(self.layouts.len() as u32);
        self.layouts.push(CachedLayout {
            bindings: info.bindings.clone(),
            native,
        });
        self.lookup.insert(key, id);
        log::debug!("descriptor set layout cache miss, created layout #{}", id.0);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: DescriptorSetLayoutId) -> Option<&CachedLayout<L>> {
        self.layouts.get(id.index())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// 取出所有 native layout，用于 device 销毁
    pub fn drain(&mut self) -> impl Iterator<Item = L> + '_ {
        self.lookup.clear();
        self.layouts.drain(..).map(|layout| layout.native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::{error::GfxError, flags::ShaderStages};

    fn storage_pair(stages: ShaderStages) -> DescriptorSetInfo {
        DescriptorSetInfo::new([
            DescriptorBindingInfo::new(DescriptorType::StorageBuffer, stages),
            DescriptorBindingInfo::new(DescriptorType::StorageBuffer, stages),
        ])
    }

    #[test]
    fn identical_lists_share_one_layout() {
        let mut cache = DescriptorSetLayoutCache::<u32>::default();
        let mut created = 0;

        let a = cache
            .get_or_create(&storage_pair(ShaderStages::COMPUTE), |_| {
                created += 1;
                Ok(created)
            })
            .unwrap();
        let b = cache.get_or_create(&storage_pair(ShaderStages::COMPUTE), |_| panic!("must hit")).unwrap();

        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stage_mask_is_not_part_of_the_key() {
        let mut cache = DescriptorSetLayoutCache::<()>::default();
        let a = cache.get_or_create(&storage_pair(ShaderStages::COMPUTE), |_| Ok(())).unwrap();
        let b = cache.get_or_create(&storage_pair(ShaderStages::FRAGMENT), |_| panic!("must hit")).unwrap();

        assert_eq!(a, b);
        // 第一次插入时的 stage 生效
        assert_eq!(cache.get(a).unwrap().bindings()[0].stages, ShaderStages::COMPUTE);
    }

    #[test]
    fn type_count_and_order_distinguish_layouts() {
        let mut cache = DescriptorSetLayoutCache::<()>::default();
        let stages = ShaderStages::COMPUTE;

        let base = cache.get_or_create(&storage_pair(stages), |_| Ok(())).unwrap();
        let mixed = DescriptorSetInfo::new([
            DescriptorBindingInfo::new(DescriptorType::UniformBuffer, stages),
            DescriptorBindingInfo::new(DescriptorType::StorageBuffer, stages),
        ]);
        let swapped = DescriptorSetInfo::new([
            DescriptorBindingInfo::new(DescriptorType::StorageBuffer, stages),
            DescriptorBindingInfo::new(DescriptorType::UniformBuffer, stages),
        ]);
        let mut arrayed = storage_pair(stages);
        arrayed.bindings[1].count = 4;

        let ids = [mixed, swapped, arrayed].map(|info| cache.get_or_create(&info, |_| Ok(())).unwrap());
        assert!(ids.iter().all(|id| *id != base));
        assert_ne!(ids[0], ids[1]);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut cache = DescriptorSetLayoutCache::<()>::default();
        let info = storage_pair(ShaderStages::COMPUTE);

        let err = cache.get_or_create(&info, |_| Err(GfxError::creation("descriptor set layout", "out of memory")));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_create(&info, |_| Ok(())).is_ok());
    }
}
