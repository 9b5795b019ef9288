//! 文件系统驱动能力接口

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::query::{Expression, QuerySource};

/// 查询返回的数据存根
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStub {
    pub address: String,
    pub size: Option<i64>,
}

/// `stat` 返回的文件属性
#[derive(Debug, Clone, Default)]
pub struct FileAttrs {
    pub size: Option<i64>,
    pub mtime: Option<DateTime<Utc>>,
    pub ctime: Option<DateTime<Utc>>,
    pub atime: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

pub type DataStubIter = Box<dyn Iterator<Item = ShepherdResult<DataStub>> + Send>;

/// 文件系统驱动
///
/// 目录遍历是阻塞型工作，因此接口保持同步；需要时由调用方放入
/// 阻塞线程池。实现对无法满足的查询条件必须返回
/// `UnsupportedPredicate` 而非静默忽略。
pub trait FilesystemDriver: Send + Sync {
    /// 驱动键，与配置中的 `driver` 字段对应
    fn driver_key(&self) -> &str;

    /// 依据来源与条件识别数据，返回存根迭代器
    fn query(
        &self,
        source: &QuerySource,
        criteria: Option<&Expression>,
    ) -> ShepherdResult<DataStubIter>;

    /// 读取单个地址的属性
    fn stat(&self, address: &str) -> ShepherdResult<FileAttrs>;

    /// 未在配置中指定并发上限时使用的默认值
    fn max_concurrency_default(&self) -> i32;

    /// 驱动支持的校验和算法
    fn supported_checksums(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// 以给定算法计算校验和
    fn checksum(&self, algorithm: &str, _address: &str) -> ShepherdResult<String> {
        Err(ShepherdError::UnsupportedOperation(format!(
            "checksum algorithm '{algorithm}' on driver '{}'",
            self.driver_key()
        )))
    }
}
