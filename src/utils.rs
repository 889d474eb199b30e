/// 生成唯一的临时文件后缀
///
/// 纳秒级时间戳 + 随机数，避免并发主机间的文件名冲突
pub fn generate_temp_suffix() -> String {
    let now = chrono::Utc::now();
    let timestamp = now.timestamp();
    let nanos = now.timestamp_subsec_nanos();
    let random_suffix: u32 = rand::random();

    format!("{}.{}.{}", timestamp, nanos, random_suffix)
}

/// 远端上传用的中转路径。放在 /tmp 下：上传本身不走特权，
/// 落位时再由 mv（可带 sudo）搬到目标路径
pub fn remote_staging_path() -> String {
    format!("/tmp/rs_converge_upload_{}.tmp", generate_temp_suffix())
}

/// 单引号包裹，内部的单引号按 POSIX 规则转义
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
