//! Deep-search summary node.
//!
//! Formats every gathered reference with running citation numbers
//! `[1]…[N]`, asks the model to answer citing those indices, and appends
//! the final assistant message. Tokens stream out — summary is an output
//! node. Model errors bubble up; the transport converts them into a
//! terminal error event.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::llm::ChatModel;
use crate::message::{ChatMessage, Role};
use crate::nodes::SUMMARY;
use crate::state::{ChatPatch, ChatState, ReferenceGroup};

const SUMMARY_SYSTEM: &str = "你是一个深度研究助手，擅长综合多方资料给出全面、准确的回答。";

fn summary_prompt(reference: &str, meta_info: &str, question: &str) -> String {
    format!(
        "# 联网参考资料
{reference}

# 当前环境信息
{meta_info}

# 任务
- 直接回答用户问题，不要重复搜索关键词或查询语句。
- 优先参考「联网参考资料」中的信息进行回复。
- 回复请使用清晰、结构化（序号/分段等）的语言，确保用户轻松理解和使用。
- 如果回复内容中参考了资料，请务必在正文的段落中引用对应的参考编号，例如[1][2]
- 回答的最后需要列出已参考的所有资料信息。格式如下：[参考编号] 资料名称
示例：
[1] 火山引擎
[2] 火山方舟大模型服务平台

# 用户问题
{question}

# 重要提示
请直接开始回答问题，不要输出搜索词、查询关键词或\"无需检索\"等内容。

# 你的回答：(直接开始正文)
"
    )
}

/// Numbers every reference item consecutively across groups.
pub(crate) fn format_references_for_summary(references: &[ReferenceGroup]) -> String {
    if references.is_empty() {
        return "暂无参考资料".to_string();
    }
    let mut out = String::new();
    let mut index = 1;
    for group in references {
        out.push_str(&format!("\n【查询 '{}' 得到的相关资料】\n", group.key));
        for item in &group.items {
            out.push_str(&format!("[{index}] {item}\n"));
            index += 1;
        }
    }
    out
}

pub struct SummaryNode {
    model: Arc<dyn ChatModel>,
}

impl SummaryNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node<ChatState> for SummaryNode {
    fn id(&self) -> &str {
        SUMMARY
    }

    async fn run(
        &self,
        state: &ChatState,
        ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let question = state.effective_question();
        info!(
            reference_groups = state.references.len(),
            "generating summary for: {question}"
        );

        let prompt = summary_prompt(
            &format_references_for_summary(&state.references),
            &format!("当前时间：{}", chrono::Local::now().format("%Y-%m-%d %H:%M")),
            &question,
        );
        let request = vec![
            ChatMessage::system(SUMMARY_SYSTEM),
            ChatMessage::user(prompt),
        ];

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(128);
        let forward = async {
            while let Some(chunk) = chunk_rx.recv().await {
                ctx.events.chat_delta(SUMMARY, chunk).await?;
            }
            Ok::<(), OrchestratorError>(())
        };
        let (reply, forwarded) = tokio::join!(
            self.model.stream(&request, Some(chunk_tx)),
            forward,
        );
        let reply = reply?;
        forwarded?;

        let assistant = ChatMessage {
            id: None,
            role: Role::Assistant,
            content: reply.content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        };
        Ok(ChatPatch {
            messages: vec![assistant],
            search_queries: Some(Vec::new()),
            ..Default::default()
        })
    }
}
