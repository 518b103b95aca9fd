// 上传错误定义

use thiserror::Error;

/// 上传链路的可区分错误
///
/// 分片序列类错误携带定位信息，调用方可以精确提示哪里断了
#[derive(Debug, Error)]
pub enum UploadError {
    /// 并发数配置非法（必须为正整数）
    #[error("并发数必须为正整数")]
    InvalidConcurrency,

    /// 分片大小配置非法（必须为正整数）
    #[error("分片大小必须为正整数")]
    InvalidChunkSize,

    /// 内容哈希为空
    #[error("内容哈希不能为空")]
    InvalidHash,

    /// 客户端已销毁，拒绝一切后续操作
    #[error("上传客户端已销毁")]
    ClientDestroyed,

    /// 合并时没有找到任何分片
    #[error("未找到任何分片: hash={hash}")]
    NoChunksFound { hash: String },

    /// 首个分片索引不为 0
    #[error("首个分片索引非法: 期望 0, 实际 {first}")]
    InvalidFirstChunk { first: usize },

    /// 分片索引序列存在空洞
    #[error("分片序列不连续: 期望 {expected}, 实际 {found}")]
    InvalidChunkSequence { expected: usize, found: usize },

    /// 批次结束但存在失败分片，拒绝合并
    #[error("分片上传不完整: {failed} 个分片失败")]
    ChunksIncomplete { failed: usize },

    /// 外部动作（存储/传输）错误
    #[error(transparent)]
    Action(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_errors_carry_positions() {
        let err = UploadError::InvalidChunkSequence {
            expected: 3,
            found: 5,
        };
        let message = err.to_string();
        assert!(message.contains('3'));
        assert!(message.contains('5'));

        let err = UploadError::InvalidFirstChunk { first: 2 };
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_action_error_preserves_chain() {
        let source = anyhow::anyhow!("底层 IO 错误");
        let err = UploadError::from(source);
        assert!(err.to_string().contains("底层 IO 错误"));
    }
}
