//! `shepherd help [SUBJECT]` 的帮助文本

const GENERAL: &str = "\
用法:
  shepherd [OPTIONS] from FS_A to FS_B QUERY    自动规划路线并传输
  shepherd [OPTIONS] through NAMED_ROUTE QUERY  按命名路线传输
  shepherd [OPTIONS] --resume JOB_ID            恢复既有作业
  shepherd help [SUBJECT]                       查看帮助

SUBJECT 可为: query, config, exit-codes

选项:
  -S FILE            设置文件（默认 ~/.shepherdrc）
  -C DIR|FILE        配置文件或目录，可重复，后者覆盖前者
  -v NAME=VALUE      定义模板变量，可重复
  --variables FILE   从 YAML 文件读入模板变量，可重复

环境变量 SHEPHERD_* 会剥除前缀后进入模板变量环境。
";

const QUERY: &str = "\
目标查询:
  take SOURCE [where EXPRESSION]

  SOURCE     = from PATH [compressed] [delimited by OCTET]   文件名清单
             | PATH...                                       检索根
  EXPRESSION = PREDICATE ((and|or) EXPRESSION)* | ( EXPRESSION )
  PREDICATE  = [not] KEY COMPARATOR VALUE
  KEY        = size|name|path|mtime|ctime|atime|depth|owner|group | :metadata_key
  COMPARATOR = = | > | >= | < | <=
  VALUE      = 字符串 [单位]；大小单位 (k|M|G|T|P)[i][B]，
               时间单位 (hour|day|week|year)[s]

示例:
  shepherd from lustre to irods take /data where size '>' 1GiB and not name = '*.tmp'
";

const CONFIG: &str = "\
配置文件（YAML，顶层键）:
  filesystems   名称、driver、max_concurrency
  transfers     有向传输路线: source/target 文件系统、cost、script 模板、
                transformations 管线
  named_routes  预声明的多跳路线，逐跳可附加 transformations
  executor      执行器驱动及选项
  phase         prepare/transfer 两阶段的资源请求 (cores, memory, group)
  defaults      max_attempts 与模板变量默认值

脚本模板内可用 {{ source.filesystem }}、{{ source.address }}、
{{ target.* }} 以及变量环境；过滤器: sh_escape、dirname、basename。
";

const EXIT_CODES: &str = "\
退出码:
  0  全部任务成功
  1  用法错误
  2  配置或模板错误
  3  无法解析传输路线
  4  部分失败（有任务重试耗尽；已成功的任务保留在状态库中）
  5  内部错误
";

pub fn text(subject: Option<&str>) -> String {
    match subject {
        None => GENERAL.to_string(),
        Some("query") => QUERY.to_string(),
        Some("config") => CONFIG.to_string(),
        Some("exit-codes") => EXIT_CODES.to_string(),
        Some(other) => format!("未知的帮助主题: {other}\n\n{GENERAL}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_subjects() {
        assert!(text(None).contains("through NAMED_ROUTE"));
        assert!(text(Some("query")).contains("delimited by"));
        assert!(text(Some("config")).contains("named_routes"));
        assert!(text(Some("exit-codes")).contains("4"));
        assert!(text(Some("bogus")).contains("未知的帮助主题"));
    }
}
