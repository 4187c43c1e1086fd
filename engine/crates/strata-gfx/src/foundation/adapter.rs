use crate::basic::flags::{AdapterKind, DeviceFlags, QueueFlags};

/// 参与 adapter 打分的 limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterLimits {
    pub max_image_dimension_2d: u32,
    pub max_per_set_sampled_images: u32,
    pub max_per_set_uniform_buffers: u32,
    pub max_bound_descriptor_sets: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: QueueFlags,
    pub queue_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub limits: AdapterLimits,
    pub queue_families: Vec<QueueFamilyInfo>,
}

/// device 上的一个 queue：所在 family、family 内的下标，以及 family 的能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub index: u32,
    pub flags: QueueFlags,
}

const PREFERRED_KIND_BONUS: u64 = 1000;

impl AdapterInfo {
    /// 偏好的类型加 1000 分，再加上几个 limits 之和
    pub fn score(&self, flags: DeviceFlags) -> u64 {
        let mut score = 0;
        if AdapterKind::preferred_by(flags) == Some(self.kind) {
            score += PREFERRED_KIND_BONUS;
        }
        let limits = &self.limits;
        score += limits.max_image_dimension_2d as u64;
        score += limits.max_per_set_sampled_images as u64;
        score += limits.max_per_set_uniform_buffers as u64;
        score += limits.max_bound_descriptor_sets as u64;
        score
    }

    /// 为每个请求找到一个 queue
    ///
    /// family 必须包含请求的全部能力，取第一个满足的 family；
    /// 同一个 family 被多次请求时依次分配下标，超出 family 容量后复用最后一个 queue。
    /// 任何一个请求无法满足时返回 None。
    pub fn map_queues(&self, requests: &[QueueFlags]) -> Option<Vec<QueueSlot>> {
        let mut next_index = vec![0u32; self.queue_families.len()];
        requests
            .iter()
            .map(|request| {
                let (family, info) = self
                    .queue_families
                    .iter()
                    .enumerate()
                    .find(|(_, family)| family.queue_count > 0 && family.flags.contains(*request))?;
                let index = next_index[family].min(info.queue_count - 1);
                next_index[family] += 1;
                Some(QueueSlot {
                    family: family as u32,
                    index,
                    flags: info.flags,
                })
            })
            .collect()
    }
}

/// 选出得分最高的 adapter，跳过无法满足 queue 请求的；同分时取靠前的
pub fn select_adapter(adapters: &[AdapterInfo], flags: DeviceFlags, queues: &[QueueFlags]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (index, adapter) in adapters.iter().enumerate() {
        if adapter.map_queues(queues).is_none() {
            log::info!("adapter {} skipped: missing requested queue capabilities", adapter.name);
            continue;
        }
        let score = adapter.score(flags);
        log::debug!("adapter {} scored {}", adapter.name, score);
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, kind: AdapterKind, dim: u32, families: &[(QueueFlags, u32)]) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            kind,
            limits: AdapterLimits {
                max_image_dimension_2d: dim,
                max_per_set_sampled_images: 16,
                max_per_set_uniform_buffers: 12,
                max_bound_descriptor_sets: 4,
            },
            queue_families: families
                .iter()
                .map(|(flags, count)| QueueFamilyInfo {
                    flags: *flags,
                    queue_count: *count,
                })
                .collect(),
        }
    }

    #[test]
    fn preferred_kind_outweighs_limits() {
        let all = QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER;
        let adapters = [
            adapter("integrated", AdapterKind::Integrated, 16384, &[(all, 1)]),
            adapter("discrete", AdapterKind::Discrete, 8192, &[(all, 1)]),
        ];

        let picked = select_adapter(&adapters, DeviceFlags::PREFER_DISCRETE, &[QueueFlags::GRAPHICS]);
        assert_eq!(picked, Some(1));
        let picked = select_adapter(&adapters, DeviceFlags::PREFER_INTEGRATED, &[QueueFlags::GRAPHICS]);
        assert_eq!(picked, Some(0));
        // 没有偏好时比较 limits
        let picked = select_adapter(&adapters, DeviceFlags::empty(), &[QueueFlags::GRAPHICS]);
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn adapters_without_requested_queue_are_skipped() {
        let adapters = [
            adapter("compute only", AdapterKind::Discrete, 16384, &[(QueueFlags::COMPUTE, 2)]),
            adapter("graphics", AdapterKind::Integrated, 4096, &[(QueueFlags::GRAPHICS, 1)]),
        ];
        let picked = select_adapter(&adapters, DeviceFlags::PREFER_DISCRETE, &[QueueFlags::GRAPHICS]);
        assert_eq!(picked, Some(1));

        let picked = select_adapter(&adapters, DeviceFlags::empty(), &[QueueFlags::TRANSFER]);
        assert_eq!(picked, None);
    }

    #[test]
    fn queue_family_must_contain_all_flags() {
        let a = adapter(
            "a",
            AdapterKind::Discrete,
            1,
            &[(QueueFlags::GRAPHICS, 1), (QueueFlags::GRAPHICS | QueueFlags::COMPUTE, 2), (QueueFlags::TRANSFER, 1)],
        );
        let slots = a.map_queues(&[QueueFlags::GRAPHICS | QueueFlags::COMPUTE, QueueFlags::TRANSFER]).unwrap();
        assert_eq!(slots[0].family, 1);
        assert_eq!(slots[1].family, 2);
    }

    #[test]
    fn queue_index_is_clamped_to_family_size() {
        let a = adapter("a", AdapterKind::Discrete, 1, &[(QueueFlags::GRAPHICS, 2)]);
        let slots = a.map_queues(&[QueueFlags::GRAPHICS; 3]).unwrap();
        assert_eq!(slots.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 1]);
    }
}
