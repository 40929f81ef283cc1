//! Deep-search planning node.
//!
//! Decides whether the gathered references already answer the question.
//! The model either returns the literal "无需检索" (go summarise) or 1 to
//! `max_search_words` semicolon-separated queries. Every pass increments
//! `planning_rounds`; the conditional edge forces the summary once the
//! round budget is spent. Model errors bubble up and terminate the
//! invocation; the transport turns them into a terminal error event.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::llm::ChatModel;
use crate::message::ChatMessage;
use crate::nodes::PLANNING;
use crate::state::{ChatPatch, ChatState, ReferenceGroup};

const PLANNING_SYSTEM: &str = "你是一个深度研究助手，擅长分析问题并规划搜索策略。";

fn planning_prompt(question: &str, reference: &str, meta_info: &str, max_search_words: usize) -> String {
    format!(
        "你是一个联网信息搜索专家，你需要根据用户的问题，通过联网搜索来搜集相关信息，然后根据这些信息来回答用户的问题。

# 用户问题：
{question}

# 当前已知资料

{reference}

# 当前环境信息

{meta_info}

# 任务
- 判断「当前已知资料」是否已经足够回答用户的问题
- 如果「当前已知资料」已经足够回答用户的问题，返回\"无需检索\"，不要输出任何其他多余的内容
- 如果判断「当前已知资料」还不足以回答用户的问题，思考还需要搜索什么信息，输出对应的关键词，请保证每个关键词的精简和独立性
- 输出的每个关键词都应该要具体到可以用于独立检索，要包括完整的主语和宾语，避免歧义和使用代词，关键词之间不能有指代关系
- 可以输出1 ～ {max_search_words}个关键词，当暂时无法提出足够准确的关键词时，请适当地减少关键词的数量
- 输出多个关键词时，关键词之间用 ; 分割，不要输出其他任何多余的内容

# 你的回答：
"
    )
}

/// Formats accumulated references for the planner.
pub(crate) fn format_references(references: &[ReferenceGroup]) -> String {
    if references.is_empty() {
        return "暂无已知资料".to_string();
    }
    let mut out = String::new();
    for group in references {
        out.push_str(&format!("【查询 {} 得到的相关资料】", group.key));
        for (i, item) in group.items.iter().enumerate() {
            out.push_str(&format!("参考{}: {}\n", i + 1, item));
        }
    }
    out
}

/// Extracts search queries from the planner output; `None` means no
/// further search is needed.
pub fn parse_search_queries(output: &str) -> Option<Vec<String>> {
    if output.contains("无需") {
        return None;
    }
    let queries: Vec<String> = output
        .split(';')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();
    if queries.is_empty() {
        None
    } else {
        Some(queries)
    }
}

pub struct PlanningNode {
    model: Arc<dyn ChatModel>,
    max_search_words: usize,
}

impl PlanningNode {
    pub fn new(model: Arc<dyn ChatModel>, max_search_words: usize) -> Self {
        Self {
            model,
            max_search_words,
        }
    }
}

#[async_trait]
impl Node<ChatState> for PlanningNode {
    fn id(&self) -> &str {
        PLANNING
    }

    async fn run(
        &self,
        state: &ChatState,
        _ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let question = state.effective_question();
        let rounds = state.planning_rounds + 1;
        info!(round = rounds, "planning for question: {question}");

        let prompt = planning_prompt(
            &question,
            &format_references(&state.references),
            &format!("当前时间：{}", chrono::Local::now().format("%Y-%m-%d %H:%M")),
            self.max_search_words,
        );
        let request = vec![
            ChatMessage::system(PLANNING_SYSTEM),
            ChatMessage::user(prompt),
        ];

        let reply = self.model.invoke(&request).await?;
        let output = crate::message::extract_text(&reply.content)
            .trim()
            .to_string();
        let queries = match parse_search_queries(&output) {
            Some(mut queries) => {
                queries.truncate(self.max_search_words);
                info!("generated search queries: {queries:?}");
                queries
            }
            None => {
                info!("no more search needed, proceeding to summary");
                Vec::new()
            }
        };

        Ok(ChatPatch {
            search_queries: Some(queries),
            planning_rounds: Some(rounds),
            question: Some(question),
            ..Default::default()
        })
    }
}
