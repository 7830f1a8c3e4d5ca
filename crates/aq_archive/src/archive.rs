// crates/aq_archive/src/archive.rs

//! 集合状态归档
//!
//! 每个快照是一个文本文件 `<yyyyMMdd HH-mm>.txt`，首行为表头
//! `Id\tWeight\t<var…>`，其后每行一个粒子。快照表示"该时刻的集合"，
//! 归档按表示时刻索引。
//!
//! 写入是原子的（先写临时文件再重命名），失败重试一次。
//! 快照数超过上限时**均匀随机**删除一个历史快照——上限是对历史
//! 状态的粗粒度内存约束，不是 LRU 缓存。

use crate::error::{ArchiveError, ArchiveResult};
use aq_filter::{Particle, PARTICLE_PREFIX};
use aq_foundation::timefmt;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 默认快照数上限
pub const DEFAULT_MAX_FILES: usize = 50;

/// 磁盘状态归档
///
/// 时间戳索引保存在内存里，构造时扫描目录恢复，
/// 因此中断后重启可以继续使用既有快照。
pub struct StateArchive {
    dir: PathBuf,
    variables: Vec<String>,
    index: RwLock<BTreeSet<NaiveDateTime>>,
    max_files: usize,
}

impl StateArchive {
    /// 打开（或创建）归档目录并恢复索引
    ///
    /// `variables` 为状态向量各分量名，用于表头。
    /// 无法解析为时间戳的文件名仅记日志后忽略。
    pub fn open(
        dir: impl Into<PathBuf>,
        variables: Vec<String>,
    ) -> ArchiveResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match timefmt::parse_state_stamp(stem) {
                    Ok(stamp) => {
                        index.insert(stamp);
                    }
                    Err(_) => {
                        warn!("ignoring non-snapshot file {}", path.display());
                    }
                }
            }
        }
        debug!("archive opened with {} snapshot(s)", index.len());

        Ok(Self {
            dir,
            variables,
            index: RwLock::new(index),
            max_files: DEFAULT_MAX_FILES,
        })
    }

    /// 设置快照数上限
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// 归档目录
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// 当前快照数
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// 是否没有任何快照
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// 是否存在给定时刻的快照
    pub fn contains(&self, stamp: NaiveDateTime) -> bool {
        self.index.read().contains(&stamp)
    }

    /// 全部快照时刻，升序
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.index.read().iter().copied().collect()
    }

    /// 严格早于 `stamp` 的最近快照时刻
    pub fn nearest_before(&self, stamp: NaiveDateTime) -> Option<NaiveDateTime> {
        self.index.read().range(..stamp).next_back().copied()
    }

    fn snapshot_path(&self, stamp: NaiveDateTime) -> PathBuf {
        self.dir
            .join(format!("{}.txt", timefmt::format_state_stamp(stamp)))
    }

    /// 写入（覆盖）一个快照并执行上限控制
    ///
    /// 写入先落到临时文件再重命名；IO 失败重试一次，
    /// 仍失败时返回错误，既有快照保持完好。
    pub fn write(
        &self,
        stamp: NaiveDateTime,
        particles: &[Particle],
        rng: &mut impl Rng,
    ) -> ArchiveResult<()> {
        let mut content = String::new();
        content.push_str("Id\tWeight");
        for name in &self.variables {
            content.push('\t');
            content.push_str(name);
        }
        content.push('\n');
        for (i, particle) in particles.iter().enumerate() {
            content.push_str(&format!("{}\t{}", i + 1, particle.weight));
            for value in &particle.state {
                content.push('\t');
                content.push_str(&value.to_string());
            }
            content.push('\n');
        }

        let path = self.snapshot_path(stamp);
        if let Err(first) = self.write_atomic(&path, &content) {
            warn!("snapshot write failed, retrying once: {first}");
            self.write_atomic(&path, &content)?;
        }
        self.index.write().insert(stamp);
        debug!("archived state for {stamp}");

        self.enforce_cap(rng);
        Ok(())
    }

    fn write_atomic(&self, path: &Path, content: &str) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)
    }

    /// 读取给定时刻的快照
    ///
    /// 粒子标识按行号重建为 `"Particle i"`，与滤波阶段约定一致。
    pub fn read(&self, stamp: NaiveDateTime) -> ArchiveResult<Vec<Particle>> {
        let path = self.snapshot_path(stamp);
        if !path.exists() {
            return Err(ArchiveError::StateNotFound(stamp));
        }
        let (_, particles) = load_snapshot(&path)?;
        Ok(particles)
    }

    /// 快照文件的变量名（表头去掉 `Id`、`Weight` 两列）
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// 超限时均匀随机删除历史快照，直到回到上限以内
    fn enforce_cap(&self, rng: &mut impl Rng) {
        loop {
            let victim = {
                let index = self.index.read();
                if index.len() <= self.max_files {
                    return;
                }
                let nth = rng.gen_range(0..index.len());
                *index.iter().nth(nth).expect("non-empty index")
            };
            let path = self.snapshot_path(victim);
            match fs::remove_file(&path) {
                Ok(()) => {
                    self.index.write().remove(&victim);
                    debug!("evicted snapshot {victim}");
                }
                Err(err) => {
                    // 删不掉就放弃本轮，避免死循环
                    warn!("could not evict snapshot {victim}: {err}");
                    self.index.write().remove(&victim);
                }
            }
        }
    }
}

/// 解析一个快照文件，返回 `(变量名, 粒子)`
///
/// 表头形如 `Id\tWeight\t<var…>`；粒子标识按行号重建为
/// `"Particle i"`。归档内部与命令行加载基准状态共用本函数。
pub fn load_snapshot(path: &Path) -> ArchiveResult<(Vec<String>, Vec<Particle>)> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    let header = lines.next().ok_or_else(|| ArchiveError::Malformed {
        path: path.to_path_buf(),
        reason: "missing header".into(),
    })?;
    let variables: Vec<String> =
        header.split('\t').skip(2).map(str::to_string).collect();

    let mut particles = Vec::new();
    for (row, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split('\t').collect();
        if tokens.len() < 3 {
            return Err(ArchiveError::Malformed {
                path: path.to_path_buf(),
                reason: format!("row {} has {} column(s)", row + 1, tokens.len()),
            });
        }
        let weight: f64 = tokens[1].parse().map_err(|e| ArchiveError::Malformed {
            path: path.to_path_buf(),
            reason: format!("row {} weight: {e}", row + 1),
        })?;
        let mut state = Vec::with_capacity(tokens.len() - 2);
        for token in &tokens[2..] {
            state.push(token.parse().map_err(|e| ArchiveError::Malformed {
                path: path.to_path_buf(),
                reason: format!("row {} value: {e}", row + 1),
            })?);
        }
        particles.push(Particle::new(
            format!("{} {}", PARTICLE_PREFIX, row + 1),
            state,
            weight,
        ));
    }
    Ok((variables, particles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stamp(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn sample_particles() -> Vec<Particle> {
        vec![
            Particle::new("Particle 1", vec![1.5, -2.0, 0.25], 0.75),
            Particle::new("Particle 2", vec![0.0, 3.125, 7.5], 0.0),
            Particle::new("Particle 3", vec![-1.0, 0.5, 2.0], 1.25),
        ]
    }

    fn variables() -> Vec<String> {
        vec!["sm1".into(), "sm2".into(), "sm3".into()]
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = StateArchive::open(dir.path(), variables()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let original = sample_particles();
        archive.write(stamp(6, 0), &original, &mut rng).unwrap();
        let restored = archive.read(stamp(6, 0)).unwrap();

        assert_eq!(restored.len(), original.len());
        for (a, b) in restored.iter().zip(&original) {
            assert_eq!(a.state, b.state);
            assert_eq!(a.weight, b.weight);
        }
        assert_eq!(restored[0].id, "Particle 1");
    }

    #[test]
    fn test_missing_state_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = StateArchive::open(dir.path(), variables()).unwrap();
        assert!(matches!(
            archive.read(stamp(6, 0)),
            Err(ArchiveError::StateNotFound(_))
        ));
    }

    #[test]
    fn test_nearest_before() {
        let dir = tempfile::tempdir().unwrap();
        let archive = StateArchive::open(dir.path(), variables()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        archive.write(stamp(6, 0), &sample_particles(), &mut rng).unwrap();
        archive.write(stamp(9, 0), &sample_particles(), &mut rng).unwrap();

        assert_eq!(archive.nearest_before(stamp(8, 0)), Some(stamp(6, 0)));
        assert_eq!(archive.nearest_before(stamp(9, 0)), Some(stamp(6, 0)));
        assert_eq!(archive.nearest_before(stamp(12, 0)), Some(stamp(9, 0)));
        assert_eq!(archive.nearest_before(stamp(6, 0)), None);
    }

    #[test]
    fn test_recovery_scans_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let archive = StateArchive::open(dir.path(), variables()).unwrap();
            let mut rng = StdRng::seed_from_u64(3);
            archive.write(stamp(6, 0), &sample_particles(), &mut rng).unwrap();
            archive.write(stamp(7, 0), &sample_particles(), &mut rng).unwrap();
        }
        // 重新打开：索引应从磁盘恢复
        let reopened = StateArchive::open(dir.path(), variables()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains(stamp(6, 0)));
        assert_eq!(reopened.read(stamp(7, 0)).unwrap().len(), 3);
    }

    #[test]
    fn test_overwrite_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let archive = StateArchive::open(dir.path(), variables()).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        archive.write(stamp(6, 0), &sample_particles(), &mut rng).unwrap();

        let replacement = vec![Particle::new("Particle 1", vec![9.0, 9.0, 9.0], 2.0)];
        archive.write(stamp(6, 0), &replacement, &mut rng).unwrap();

        let restored = archive.read(stamp(6, 0)).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].state, vec![9.0, 9.0, 9.0]);
        assert_eq!(archive.len(), 1);
    }

    /// 上限控制：写 60 个快照、上限 50，应恰好剩 50 个文件，
    /// 且被删的不是严格最旧的 10 个
    #[test]
    fn test_cap_evicts_uniformly_not_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = StateArchive::open(dir.path(), variables()).unwrap();
        let mut rng = StdRng::seed_from_u64(12345);

        let mut stamps = Vec::new();
        for i in 0..60u32 {
            let s = stamp(i / 60, i % 60);
            stamps.push(s);
            archive.write(s, &sample_particles(), &mut rng).unwrap();
        }

        assert_eq!(archive.len(), 50);
        let files = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().is_some_and(|x| x == "txt")
            })
            .count();
        assert_eq!(files, 50);

        // 均匀删除下，最旧的 10 个恰好全部被删的概率可以忽略
        let survivors = archive.timestamps();
        let oldest_survived = stamps[..10].iter().any(|s| survivors.contains(s));
        assert!(oldest_survived, "eviction behaved like strict LRU");
    }
}
