//! 대화 캐시 - LRU 기반 멀티턴 대화 관리
//!
//! 대화를 LRU 캐시로 유지합니다. 용량 초과 시 가장 오래
//! 접근되지 않은 대화가 밀려나고, 새 대화 생성은 절대 거부되지
//! 않습니다. 대화당 메시지 수 상한과 TTL 축출, 토큰 예산 기반
//! 히스토리 추출을 제공합니다.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConversationConfig;
use crate::error::{RagError, Result};
use crate::generation::PromptMessage;

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// 대화 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 대화 컨텍스트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// 대화 통계
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_tokens_estimate: usize,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// 목록 조회용 요약
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// 영속화/이관용 스냅샷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub stats: ConversationStats,
}

/// 토큰 수 추정 (단어 수 * 1.3)
///
/// 토크나이저 없이 쓰는 보수적 근사치입니다.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3) as usize
}

// ============================================================================
// ConversationService
// ============================================================================

/// 캐시 엔트리 (컨텍스트와 통계가 함께 축출됨)
struct Entry {
    context: ConversationContext,
    stats: ConversationStats,
}

impl Entry {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            context: ConversationContext {
                id,
                messages: Vec::new(),
                metadata: HashMap::new(),
                created_at: now,
            },
            stats: ConversationStats {
                message_count: 0,
                user_messages: 0,
                assistant_messages: 0,
                total_tokens_estimate: 0,
                started_at: now,
                last_activity: now,
            },
        }
    }

    /// 메시지 목록에서 통계 재계산 (last_activity는 갱신)
    fn recompute_stats(&mut self) {
        let messages = &self.context.messages;
        self.stats.message_count = messages.len();
        self.stats.user_messages = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count();
        self.stats.assistant_messages = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count();
        self.stats.total_tokens_estimate =
            messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        self.stats.last_activity = Utc::now();
    }
}

/// 대화 캐시 서비스
pub struct ConversationService {
    config: ConversationConfig,
    cache: Mutex<LruCache<String, Entry>>,
}

impl ConversationService {
    /// 서비스 생성
    ///
    /// # Errors
    /// `max_conversations`가 0이거나 `max_messages_per_conversation`이
    /// 2 미만이면 `InvalidInput` (시스템 턴과 최신 턴을 항상 보존해야
    /// 하므로 상한은 최소 2)
    pub fn new(config: ConversationConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.max_conversations).ok_or_else(|| {
            RagError::InvalidInput("max_conversations must be greater than 0".to_string())
        })?;
        if config.max_messages_per_conversation < 2 {
            return Err(RagError::InvalidInput(format!(
                "max_messages_per_conversation must be at least 2, got {}",
                config.max_messages_per_conversation
            )));
        }

        Ok(Self {
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// 대화 조회 또는 생성
    ///
    /// ID가 없거나 캐시에 없으면 새 대화를 만듭니다. 용량이 가득
    /// 차 있으면 LRU 대화가 밀려나며 생성이 거부되는 일은 없습니다.
    /// 조회는 항상 해당 대화를 최신으로 승격시킵니다.
    pub async fn get_or_create(&self, id: Option<&str>) -> String {
        let mut cache = self.cache.lock().await;

        if let Some(id) = id {
            if cache.get(id).is_some() {
                return id.to_string();
            }
        }

        let new_id = id
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(conversation = %new_id, "created conversation");
        cache.put(new_id.clone(), Entry::new(new_id.clone()));
        new_id
    }

    /// 대화 컨텍스트 조회 (LRU 승격)
    pub async fn get(&self, id: &str) -> Option<ConversationContext> {
        let mut cache = self.cache.lock().await;
        cache.get(id).map(|e| e.context.clone())
    }

    /// 메시지 추가
    ///
    /// 시스템 메시지는 교체 의미론입니다 (대화당 최대 1개, 항상 맨 앞).
    /// 메시지 수가 상한을 넘으면 시스템 메시지와 최신 메시지를
    /// 남기고 오래된 것부터 제거합니다. 방금 추가한 메시지는
    /// 절대 잘리지 않습니다.
    pub async fn append_message(
        &self,
        id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let entry = cache
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {id}")))?;

        let message = ChatMessage::new(role, content);

        if role == MessageRole::System {
            // 기존 시스템 메시지 제거 후 맨 앞에 삽입
            entry.context.messages.retain(|m| m.role != MessageRole::System);
            entry.context.messages.insert(0, message);
        } else {
            entry.context.messages.push(message);
        }

        let max = self.config.max_messages_per_conversation;
        if entry.context.messages.len() > max {
            let system: Vec<ChatMessage> = entry
                .context
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .cloned()
                .collect();
            let others: Vec<ChatMessage> = entry
                .context
                .messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .cloned()
                .collect();

            let keep = max.saturating_sub(system.len()).max(1);
            let tail_start = others.len().saturating_sub(keep);

            let mut trimmed = system;
            trimmed.extend_from_slice(&others[tail_start..]);
            entry.context.messages = trimmed;
        }

        entry.recompute_stats();
        Ok(())
    }

    /// 시스템 메시지 설정 (기존 것 교체)
    pub async fn set_system_message(&self, id: &str, content: impl Into<String>) -> Result<()> {
        self.append_message(id, MessageRole::System, content).await
    }

    /// 히스토리 초기화
    pub async fn clear_history(&self, id: &str, keep_system: bool) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let entry = cache
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {id}")))?;

        if keep_system {
            entry.context.messages.retain(|m| m.role == MessageRole::System);
        } else {
            entry.context.messages.clear();
        }

        entry.recompute_stats();
        Ok(())
    }

    /// 대화 삭제. 존재했으면 true
    pub async fn delete(&self, id: &str) -> bool {
        let mut cache = self.cache.lock().await;
        cache.pop(id).is_some()
    }

    /// 대화 목록 (최근 접근 순)
    pub async fn list(&self, limit: usize) -> Vec<ConversationSummary> {
        let cache = self.cache.lock().await;
        cache
            .iter()
            .take(limit)
            .map(|(id, entry)| ConversationSummary {
                id: id.clone(),
                message_count: entry.context.messages.len(),
                created_at: entry.context.created_at,
                last_activity: entry.stats.last_activity,
            })
            .collect()
    }

    /// 대화 통계
    pub async fn stats(&self, id: &str) -> Option<ConversationStats> {
        let mut cache = self.cache.lock().await;
        cache.get(id).map(|e| e.stats.clone())
    }

    /// 현재 캐시된 대화 수
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    /// 비활성 대화 축출
    ///
    /// 마지막 활동이 `max_age`보다 오래된 대화를 제거하고
    /// 제거된 개수를 반환합니다.
    pub async fn evict_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut cache = self.cache.lock().await;

        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.stats.last_activity < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            cache.pop(id);
        }

        if !expired.is_empty() {
            info!(evicted = expired.len(), "evicted expired conversations");
        }
        expired.len()
    }

    /// 설정 TTL 기준 축출
    pub async fn evict_expired_default(&self) -> usize {
        self.evict_expired(Duration::hours(self.config.ttl_hours)).await
    }

    /// 생성용 히스토리 추출 (토큰 예산)
    ///
    /// 시스템 메시지를 먼저 예산에 포함시킨 뒤, 나머지는 최신
    /// 메시지부터 예산이 허용하는 만큼 선택합니다. 반환 순서는
    /// 시간순입니다.
    pub async fn context_for_generation(
        &self,
        id: &str,
        max_tokens: usize,
    ) -> Result<Vec<PromptMessage>> {
        let mut cache = self.cache.lock().await;
        let entry = cache
            .get(id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {id}")))?;

        let mut total_tokens = 0;
        let mut result: Vec<PromptMessage> = Vec::new();

        // 시스템 메시지는 항상 포함 (예산 차감)
        for msg in &entry.context.messages {
            if msg.role == MessageRole::System {
                total_tokens += estimate_tokens(&msg.content);
                result.push(PromptMessage::new(msg.role.as_str(), msg.content.clone()));
            }
        }

        let mut selected: Vec<&ChatMessage> = Vec::new();
        for msg in entry
            .context
            .messages
            .iter()
            .rev()
            .filter(|m| m.role != MessageRole::System)
        {
            let tokens = estimate_tokens(&msg.content);
            if total_tokens + tokens > max_tokens {
                break;
            }
            total_tokens += tokens;
            selected.push(msg);
        }

        // 최신부터 골랐으므로 뒤집어 시간순으로
        result.extend(
            selected
                .into_iter()
                .rev()
                .map(|m| PromptMessage::new(m.role.as_str(), m.content.clone())),
        );

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Export / Import
    // ------------------------------------------------------------------

    /// 대화 스냅샷 추출
    pub async fn export(&self, id: &str) -> Result<ConversationSnapshot> {
        let mut cache = self.cache.lock().await;
        let entry = cache
            .get(id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {id}")))?;

        Ok(ConversationSnapshot {
            id: entry.context.id.clone(),
            messages: entry.context.messages.clone(),
            metadata: entry.context.metadata.clone(),
            created_at: entry.context.created_at,
            stats: entry.stats.clone(),
        })
    }

    /// 스냅샷에서 대화 복원 (동일 ID가 있으면 덮어씀)
    pub async fn import(&self, snapshot: ConversationSnapshot) -> Result<String> {
        if snapshot.id.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "snapshot id must not be empty".to_string(),
            ));
        }

        let id = snapshot.id.clone();
        let mut entry = Entry::new(id.clone());
        entry.context.messages = snapshot.messages;
        entry.context.metadata = snapshot.metadata;
        entry.context.created_at = snapshot.created_at;
        entry.stats.started_at = snapshot.stats.started_at;
        entry.recompute_stats();

        let mut cache = self.cache.lock().await;
        cache.put(id.clone(), entry);
        Ok(id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_conversations: usize, max_messages: usize) -> ConversationConfig {
        ConversationConfig {
            max_conversations,
            max_messages_per_conversation: max_messages,
            ttl_hours: 24,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ConversationService::new(test_config(0, 100)).is_err());
        // 시스템 턴 + 최신 턴을 담으려면 상한은 최소 2
        assert!(ConversationService::new(test_config(10, 1)).is_err());
        assert!(ConversationService::new(test_config(10, 2)).is_ok());
    }

    #[tokio::test]
    async fn test_message_cap_at_minimum() {
        // 상한 2: 시스템 턴 + 방금 추가한 턴만 남음
        let service = ConversationService::new(test_config(10, 2)).unwrap();
        let id = service.get_or_create(None).await;

        service.set_system_message(&id, "sys").await.unwrap();
        service
            .append_message(&id, MessageRole::User, "first")
            .await
            .unwrap();
        service
            .append_message(&id, MessageRole::User, "second")
            .await
            .unwrap();

        let ctx = service.get(&id).await.unwrap();
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].role, MessageRole::System);
        assert_eq!(ctx.messages[1].content, "second");
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();

        let id = service.get_or_create(None).await;
        let same = service.get_or_create(Some(&id)).await;
        assert_eq!(id, same);
        assert_eq!(service.len().await, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_never_rejects() {
        let service = ConversationService::new(test_config(2, 100)).unwrap();

        let a = service.get_or_create(None).await;
        let b = service.get_or_create(None).await;
        let _c = service.get_or_create(None).await;

        // 용량 2에서 세 번째 생성은 가장 오래된 a를 밀어냄
        assert_eq!(service.len().await, 2);
        assert!(service.get(&a).await.is_none());
        assert!(service.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn test_access_protects_from_eviction() {
        let service = ConversationService::new(test_config(2, 100)).unwrap();

        let a = service.get_or_create(None).await;
        let b = service.get_or_create(None).await;

        // a를 접근해 최신으로 승격 -> b가 축출 대상이 됨
        service.get(&a).await;
        let _c = service.get_or_create(None).await;

        assert!(service.get(&a).await.is_some());
        assert!(service.get(&b).await.is_none());
    }

    #[tokio::test]
    async fn test_append_and_stats() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;

        service
            .append_message(&id, MessageRole::User, "hello there friend")
            .await
            .unwrap();
        service
            .append_message(&id, MessageRole::Assistant, "hi")
            .await
            .unwrap();

        let stats = service.stats(&id).await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 1);
        assert!(stats.total_tokens_estimate > 0);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let result = service
            .append_message("nope", MessageRole::User, "hi")
            .await;
        assert!(matches!(result, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_message_cap_keeps_system_and_newest() {
        let service = ConversationService::new(test_config(10, 4)).unwrap();
        let id = service.get_or_create(None).await;

        service.set_system_message(&id, "system prompt").await.unwrap();
        for i in 0..5 {
            service
                .append_message(&id, MessageRole::User, format!("msg {i}"))
                .await
                .unwrap();
        }

        let ctx = service.get(&id).await.unwrap();
        assert_eq!(ctx.messages.len(), 4);
        assert_eq!(ctx.messages[0].role, MessageRole::System);
        // 가장 최근 3개 유지
        assert_eq!(ctx.messages[1].content, "msg 2");
        assert_eq!(ctx.messages[3].content, "msg 4");
    }

    #[tokio::test]
    async fn test_system_message_replace() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;

        service
            .append_message(&id, MessageRole::User, "first")
            .await
            .unwrap();
        service.set_system_message(&id, "v1").await.unwrap();
        service.set_system_message(&id, "v2").await.unwrap();

        let ctx = service.get(&id).await.unwrap();
        let systems: Vec<&ChatMessage> = ctx
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].content, "v2");
        // 시스템 메시지는 항상 맨 앞
        assert_eq!(ctx.messages[0].role, MessageRole::System);
    }

    #[tokio::test]
    async fn test_clear_history_keep_system() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;

        service.set_system_message(&id, "sys").await.unwrap();
        service
            .append_message(&id, MessageRole::User, "hi")
            .await
            .unwrap();

        service.clear_history(&id, true).await.unwrap();
        let ctx = service.get(&id).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].role, MessageRole::System);

        service.clear_history(&id, false).await.unwrap();
        assert!(service.get(&id).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_context_for_generation_budget() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;

        service.set_system_message(&id, "sys").await.unwrap();
        // 각 메시지 약 4단어 = 5 토큰
        for i in 0..10 {
            service
                .append_message(&id, MessageRole::User, format!("message number {i} padding"))
                .await
                .unwrap();
        }

        // 시스템(1토큰) + 약 2개 메시지만 들어가는 예산
        let messages = service.context_for_generation(&id, 12).await.unwrap();

        assert_eq!(messages[0].role, "system");
        // 최신 메시지가 선택되고 시간순으로 반환됨
        let last = messages.last().unwrap();
        assert!(last.content.contains("number 9"));
        assert!(messages.len() < 11);
        for pair in messages[1..].windows(2) {
            // 선택된 히스토리는 시간순
            let a: usize = pair[0].content.split_whitespace().nth(2).unwrap().parse().unwrap();
            let b: usize = pair[1].content.split_whitespace().nth(2).unwrap().parse().unwrap();
            assert!(a < b);
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;

        assert!(service.delete(&id).await);
        assert!(!service.delete(&id).await);
        assert!(service.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_mru_first() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let a = service.get_or_create(None).await;
        let b = service.get_or_create(None).await;

        // a 접근으로 승격
        service.get(&a).await;

        let list = service.list(10).await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a);
        assert_eq!(list[1].id, b);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        service.get_or_create(None).await;
        service.get_or_create(None).await;

        // 미래 기준점이면 모두 만료
        let evicted = service.evict_expired(Duration::hours(-1)).await;
        assert_eq!(evicted, 2);
        assert!(service.is_empty().await);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let service = ConversationService::new(test_config(10, 100)).unwrap();
        let id = service.get_or_create(None).await;
        service.set_system_message(&id, "sys").await.unwrap();
        service
            .append_message(&id, MessageRole::User, "question")
            .await
            .unwrap();

        let snapshot = service.export(&id).await.unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: ConversationSnapshot = serde_json::from_str(&json).unwrap();

        let other = ConversationService::new(test_config(10, 100)).unwrap();
        let restored_id = other.import(restored).await.unwrap();
        assert_eq!(restored_id, id);

        let ctx = other.get(&id).await.unwrap();
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[1].content, "question");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("one two three four"), 5);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!(MessageRole::User.as_str(), "user");
    }
}
