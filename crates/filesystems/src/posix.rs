//! POSIX 文件系统驱动
//!
//! 目标识别支持检索根遍历与文件名清单（fofn，可带自定义分隔符与
//! gzip 压缩）。谓词基于 stat 信息评估；POSIX 没有键值元数据，
//! 相应谓词一律报告不支持。

use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use shepherd_domain::{
    Attribute, Comparator, DataStub, DataStubIter, Expression, FileAttrs, FilesystemDriver, Key,
    Predicate, QuerySource, Value,
};
use shepherd_errors::{ShepherdError, ShepherdResult};

const BLOCKSIZE: usize = 8192;

pub struct PosixFilesystem;

impl PosixFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PosixFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

/// 谓词评估所需的单文件事实
struct FileFacts {
    path: PathBuf,
    depth: Option<usize>,
    meta: std::fs::Metadata,
}

fn glob_match(pattern: &str, text: &str) -> ShepherdResult<bool> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    let compiled = regex::Regex::new(&regex)
        .map_err(|e| ShepherdError::QueryExecution(format!("无效的名称模式 '{pattern}': {e}")))?;
    Ok(compiled.is_match(text))
}

fn numeric_value(value: &Value) -> Option<i64> {
    match value {
        Value::Bytes(b) => Some(*b),
        Value::AgeSeconds(s) => Some(*s),
        Value::Text(t) => t.parse().ok(),
    }
}

fn timestamp_age(now: DateTime<Utc>, seconds: i64) -> i64 {
    (now.timestamp() - seconds).max(0)
}

fn eval_predicate(
    predicate: &Predicate,
    facts: &FileFacts,
    now: DateTime<Utc>,
) -> ShepherdResult<bool> {
    let unsupported = |reason: &str| Err(ShepherdError::UnsupportedPredicate(reason.to_string()));

    let attribute = match &predicate.key {
        Key::Metadata(_) => {
            return unsupported("POSIX 文件系统不支持键值元数据");
        }
        Key::Attribute(attribute) => *attribute,
    };

    match attribute {
        Attribute::Size => {
            let rhs = numeric_value(&predicate.value).ok_or_else(|| {
                ShepherdError::QueryExecution("size 谓词需要字节数".to_string())
            })?;
            Ok(predicate
                .comparator
                .compare_i64(facts.meta.len() as i64, rhs))
        }
        Attribute::Name | Attribute::Path => {
            if predicate.comparator != Comparator::Eq {
                return unsupported("名称与路径只支持等值（模式）比较");
            }
            let Value::Text(pattern) = &predicate.value else {
                return Err(ShepherdError::QueryExecution(
                    "名称谓词需要字符串".to_string(),
                ));
            };
            let text = match attribute {
                Attribute::Name => facts
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                _ => facts.path.to_string_lossy().into_owned(),
            };
            glob_match(pattern, &text)
        }
        Attribute::Mtime | Attribute::Ctime | Attribute::Atime => {
            let rhs = numeric_value(&predicate.value).ok_or_else(|| {
                ShepherdError::QueryExecution("时间谓词需要时长".to_string())
            })?;
            let stamp = match attribute {
                Attribute::Mtime => facts.meta.mtime(),
                Attribute::Ctime => facts.meta.ctime(),
                _ => facts.meta.atime(),
            };
            Ok(predicate
                .comparator
                .compare_i64(timestamp_age(now, stamp), rhs))
        }
        Attribute::Depth => match facts.depth {
            Some(depth) => {
                let rhs = numeric_value(&predicate.value).ok_or_else(|| {
                    ShepherdError::QueryExecution("depth 谓词需要整数".to_string())
                })?;
                Ok(predicate.comparator.compare_i64(depth as i64, rhs))
            }
            None => unsupported("fofn 来源不支持 depth 谓词"),
        },
        Attribute::Owner | Attribute::Group => {
            let id = match attribute {
                Attribute::Owner => facts.meta.uid(),
                _ => facts.meta.gid(),
            } as i64;
            let rhs = numeric_value(&predicate.value)
                .ok_or_else(|| {
                    ShepherdError::UnsupportedPredicate(
                        "owner/group 仅支持数值 uid/gid 比较".to_string(),
                    )
                })?;
            Ok(predicate.comparator.compare_i64(id, rhs))
        }
    }
}

fn matches(
    criteria: Option<&Expression>,
    facts: &FileFacts,
    now: DateTime<Utc>,
) -> ShepherdResult<bool> {
    match criteria {
        None => Ok(true),
        Some(expression) => expression.evaluate(&|p| eval_predicate(p, facts, now)),
    }
}

fn walk_roots(
    roots: Vec<String>,
    criteria: Option<Expression>,
    now: DateTime<Utc>,
) -> DataStubIter {
    let iter = roots.into_iter().flat_map(move |root| {
        let criteria = criteria.clone();
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| match entry {
                Err(e) => Some(Err(ShepherdError::QueryExecution(format!(
                    "遍历失败: {e}"
                )))),
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        return None;
                    }
                    let meta = match entry.metadata() {
                        Ok(meta) => meta,
                        Err(e) => {
                            return Some(Err(ShepherdError::QueryExecution(format!(
                                "读取属性失败 {}: {e}",
                                entry.path().display()
                            ))))
                        }
                    };
                    let facts = FileFacts {
                        path: entry.path().to_path_buf(),
                        depth: Some(entry.depth()),
                        meta,
                    };
                    match matches(criteria.as_ref(), &facts, now) {
                        Err(e) => Some(Err(e)),
                        Ok(false) => None,
                        Ok(true) => Some(Ok(DataStub {
                            address: facts.path.to_string_lossy().into_owned(),
                            size: Some(facts.meta.len() as i64),
                        })),
                    }
                }
            })
    });
    Box::new(iter)
}

fn read_fofn(
    path: &str,
    compressed: bool,
    delimiter: u8,
    criteria: Option<Expression>,
    now: DateTime<Utc>,
) -> ShepherdResult<DataStubIter> {
    let file = std::fs::File::open(path).map_err(|e| {
        ShepherdError::QueryExecution(format!("打开文件清单 {path} 失败: {e}"))
    })?;
    let reader: Box<dyn BufRead + Send> = if compressed {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let iter = reader
        .split(delimiter)
        .filter_map(move |record| {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    return Some(Err(ShepherdError::QueryExecution(format!(
                        "读取文件清单失败: {e}"
                    ))))
                }
            };
            let address = String::from_utf8_lossy(&record).trim().to_string();
            if address.is_empty() {
                return None;
            }

            match &criteria {
                None => Some(Ok(DataStub {
                    address,
                    size: None,
                })),
                Some(expression) => {
                    let meta = match std::fs::metadata(&address) {
                        Ok(meta) => meta,
                        Err(e) => {
                            return Some(Err(ShepherdError::QueryExecution(format!(
                                "读取属性失败 {address}: {e}"
                            ))))
                        }
                    };
                    let facts = FileFacts {
                        path: PathBuf::from(&address),
                        depth: None,
                        meta,
                    };
                    match expression.evaluate(&|p| eval_predicate(p, &facts, now)) {
                        Err(e) => Some(Err(e)),
                        Ok(false) => None,
                        Ok(true) => Some(Ok(DataStub {
                            address,
                            size: Some(facts.meta.len() as i64),
                        })),
                    }
                }
            }
        });
    Ok(Box::new(iter))
}

impl FilesystemDriver for PosixFilesystem {
    fn driver_key(&self) -> &str {
        "posix"
    }

    fn query(
        &self,
        source: &QuerySource,
        criteria: Option<&Expression>,
    ) -> ShepherdResult<DataStubIter> {
        let now = Utc::now();
        let criteria = criteria.cloned();
        match source {
            QuerySource::Roots(roots) => {
                debug!("POSIX 查询: {} 个检索根", roots.len());
                Ok(walk_roots(roots.clone(), criteria, now))
            }
            QuerySource::Fofn {
                path,
                compressed,
                delimiter,
            } => {
                debug!("POSIX 查询: 文件清单 {path}");
                read_fofn(path, *compressed, *delimiter, criteria, now)
            }
        }
    }

    fn stat(&self, address: &str) -> ShepherdResult<FileAttrs> {
        let meta = std::fs::metadata(address).map_err(|e| {
            ShepherdError::QueryExecution(format!("读取属性失败 {address}: {e}"))
        })?;

        Ok(FileAttrs {
            size: Some(meta.len() as i64),
            mtime: DateTime::from_timestamp(meta.mtime(), 0),
            ctime: DateTime::from_timestamp(meta.ctime(), 0),
            atime: DateTime::from_timestamp(meta.atime(), 0),
            owner: Some(meta.uid().to_string()),
            group: Some(meta.gid().to_string()),
            metadata: Default::default(),
        })
    }

    fn max_concurrency_default(&self) -> i32 {
        1
    }

    fn supported_checksums(&self) -> Vec<&'static str> {
        vec!["md5", "sha256"]
    }

    fn checksum(&self, algorithm: &str, address: &str) -> ShepherdResult<String> {
        let mut file = std::fs::File::open(address).map_err(|e| {
            ShepherdError::QueryExecution(format!("打开 {address} 失败: {e}"))
        })?;

        fn hex(bytes: &[u8]) -> String {
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        }

        fn digest<D: Digest>(file: &mut std::fs::File) -> std::io::Result<Vec<u8>> {
            let mut hasher = D::new();
            let mut buffer = [0u8; BLOCKSIZE];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(hasher.finalize().to_vec())
        }

        let bytes = match algorithm {
            "md5" => digest::<Md5>(&mut file),
            "sha256" => digest::<Sha256>(&mut file),
            other => {
                return Err(ShepherdError::UnsupportedOperation(format!(
                    "checksum algorithm '{other}' on driver 'posix'"
                )))
            }
        }
        .map_err(|e| ShepherdError::QueryExecution(format!("读取 {address} 失败: {e}")))?;

        Ok(hex(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    fn predicate(attribute: Attribute, comparator: Comparator, value: Value) -> Expression {
        Expression::Predicate(Predicate {
            key: Key::Attribute(attribute),
            comparator,
            value,
            negated: false,
        })
    }

    fn collect(iter: DataStubIter) -> Vec<DataStub> {
        let mut stubs: Vec<DataStub> = iter.map(|r| r.unwrap()).collect();
        stubs.sort_by(|a, b| a.address.cmp(&b.address));
        stubs
    }

    #[test]
    fn test_walk_all_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.cram", b"aaaa");
        write_file(dir.path(), "sub/b.cram", b"bb");
        write_file(dir.path(), "sub/deep/c.txt", b"c");

        let fs = PosixFilesystem::new();
        let source = QuerySource::Roots(vec![dir.path().to_string_lossy().into_owned()]);
        let stubs = collect(fs.query(&source, None).unwrap());

        assert_eq!(stubs.len(), 3);
        assert!(stubs.iter().all(|s| s.size.is_some()));
    }

    #[test]
    fn test_query_by_name_and_size() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.cram", b"aaaa");
        write_file(dir.path(), "b.cram", b"b");
        write_file(dir.path(), "c.txt", b"cccccc");

        let fs = PosixFilesystem::new();
        let source = QuerySource::Roots(vec![dir.path().to_string_lossy().into_owned()]);

        let by_name = predicate(
            Attribute::Name,
            Comparator::Eq,
            Value::Text("*.cram".to_string()),
        );
        let stubs = collect(fs.query(&source, Some(&by_name)).unwrap());
        assert_eq!(stubs.len(), 2);

        let by_size = by_name.and(predicate(
            Attribute::Size,
            Comparator::Gt,
            Value::Bytes(2),
        ));
        let stubs = collect(fs.query(&source, Some(&by_size)).unwrap());
        assert_eq!(stubs.len(), 1);
        assert!(stubs[0].address.ends_with("a.cram"));
    }

    #[test]
    fn test_depth_predicate() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "top.txt", b"x");
        write_file(dir.path(), "sub/nested.txt", b"x");

        let fs = PosixFilesystem::new();
        let source = QuerySource::Roots(vec![dir.path().to_string_lossy().into_owned()]);
        let shallow = predicate(Attribute::Depth, Comparator::Le, Value::Bytes(1));
        let stubs = collect(fs.query(&source, Some(&shallow)).unwrap());
        assert_eq!(stubs.len(), 1);
        assert!(stubs[0].address.ends_with("top.txt"));
    }

    #[test]
    fn test_metadata_predicate_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a", b"x");

        let fs = PosixFilesystem::new();
        let source = QuerySource::Roots(vec![dir.path().to_string_lossy().into_owned()]);
        let criteria = Expression::Predicate(Predicate {
            key: Key::Metadata("study".to_string()),
            comparator: Comparator::Eq,
            value: Value::Text("xyz".to_string()),
            negated: false,
        });

        let result: Result<Vec<_>, _> =
            fs.query(&source, Some(&criteria)).unwrap().collect();
        assert!(matches!(
            result.unwrap_err(),
            ShepherdError::UnsupportedPredicate(_)
        ));
    }

    #[test]
    fn test_fofn_plain_and_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", b"x");
        let b = write_file(dir.path(), "b", b"y");

        // 换行分隔，末尾无分隔符
        let fofn = write_file(
            dir.path(),
            "files.fofn",
            format!("{}\n{}", a.display(), b.display()).as_bytes(),
        );
        let fs = PosixFilesystem::new();
        let source = QuerySource::Fofn {
            path: fofn.to_string_lossy().into_owned(),
            compressed: false,
            delimiter: b'\n',
        };
        let stubs = collect(fs.query(&source, None).unwrap());
        assert_eq!(stubs.len(), 2);

        // NUL 分隔
        let fofn = write_file(
            dir.path(),
            "files0.fofn",
            format!("{}\0{}\0", a.display(), b.display()).as_bytes(),
        );
        let source = QuerySource::Fofn {
            path: fofn.to_string_lossy().into_owned(),
            compressed: false,
            delimiter: 0,
        };
        let stubs = collect(fs.query(&source, None).unwrap());
        assert_eq!(stubs.len(), 2);
    }

    #[test]
    fn test_fofn_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", b"x");

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(format!("{}\n", a.display()).as_bytes())
            .unwrap();
        let compressed = encoder.finish().unwrap();
        let fofn = write_file(dir.path(), "files.fofn.gz", &compressed);

        let fs = PosixFilesystem::new();
        let source = QuerySource::Fofn {
            path: fofn.to_string_lossy().into_owned(),
            compressed: true,
            delimiter: b'\n',
        };
        let stubs = collect(fs.query(&source, None).unwrap());
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].address, a.to_string_lossy());
    }

    #[test]
    fn test_stat_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "hello.txt", b"hello");
        let address = path.to_string_lossy().into_owned();

        let fs = PosixFilesystem::new();
        let attrs = fs.stat(&address).unwrap();
        assert_eq!(attrs.size, Some(5));
        assert!(attrs.mtime.is_some());
        assert!(attrs.owner.is_some());

        assert_eq!(
            fs.checksum("md5", &address).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            fs.checksum("sha256", &address).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(fs.checksum("crc32", &address).is_err());
    }
}
