//! CLI 모듈
//!
//! allma-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_data_dir, AppConfig};
use crate::orchestrator::Orchestrator;
use crate::rag::Metadata;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "allma-rag")]
#[command(version, about = "로컬 RAG 채팅 오케스트레이터 (Ollama + LanceDB)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 UTF-8 텍스트 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 소스 식별자 (--text 사용 시 필수)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 지식베이스 검색 (채팅 없이)
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// RAG 채팅 한 턴
    Chat {
        /// 사용자 메시지
        message: String,

        /// 이어갈 대화 ID (없으면 새 대화)
        #[arg(short, long)]
        conversation: Option<String>,

        /// 컨텍스트 검색 없이 순수 채팅
        #[arg(long)]
        no_rag: bool,
    },

    /// 활성 대화 목록
    Conversations {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 소스 문서 또는 대화 삭제
    Delete {
        /// 삭제할 소스 식별자
        #[arg(short, long)]
        source: Option<String>,

        /// 삭제할 대화 ID
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { text, file, source } => cmd_ingest(text, file, source).await,
        Commands::Query { query, limit } => cmd_query(&query, limit).await,
        Commands::Chat {
            message,
            conversation,
            no_rag,
        } => cmd_chat(&message, conversation, no_rag).await,
        Commands::Conversations { limit } => cmd_conversations(limit).await,
        Commands::Delete {
            source,
            conversation,
        } => cmd_delete(source, conversation).await,
        Commands::Status => cmd_status().await,
    }
}

/// 오케스트레이터 초기화 (환경변수 설정 사용)
async fn init_orchestrator() -> Result<Orchestrator> {
    Orchestrator::initialize(AppConfig::from_env())
        .await
        .context("오케스트레이터 초기화 실패 (Ollama 서버가 실행 중인지 확인하세요)")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
///
/// 텍스트 또는 파일을 분할/임베딩하여 벡터 인덱스에 저장합니다.
async fn cmd_ingest(
    text: Option<String>,
    file: Option<PathBuf>,
    source: Option<String>,
) -> Result<()> {
    let orchestrator = init_orchestrator().await?;

    let report = if let Some(ref file_path) = file {
        println!("[*] 파일 수집 중: {}", file_path.display());
        orchestrator
            .ingest_file(file_path)
            .await
            .context("파일 수집 실패")?
    } else if let Some(ref text_content) = text {
        let source = source.ok_or_else(|| {
            anyhow::anyhow!("--text 사용 시 --source를 지정해야 합니다")
        })?;
        println!("[*] 텍스트 수집 중 (소스: {})", source);
        orchestrator
            .ingest_text(text_content, &source, Metadata::new())
            .await
            .context("텍스트 수집 실패")?
    } else {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    };

    println!(
        "[OK] 수집 완료: {} 청크 (소스: {}, 차원: {})",
        report.chunks_ingested, report.source, report.embedding_dimension
    );

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(query: &str, limit: usize) -> Result<()> {
    println!("[*] 검색 중: \"{}\"", query);

    let orchestrator = init_orchestrator().await?;
    let ctx = orchestrator
        .search(query, Some(limit))
        .await
        .context("검색 실패")?;

    if !ctx.has_context() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", ctx.chunks.len());

    for (i, chunk) in ctx.chunks.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] {} #{}",
            i + 1,
            chunk.score,
            chunk.source,
            chunk.chunk_index
        );
        println!("   내용: {}", truncate_text(&chunk.content, 200));
        println!();
    }

    println!(
        "    검색 {:.1}ms / 전체 {:.1}ms ({}건 중 {}건 반환)",
        ctx.metrics.search_time_ms,
        ctx.metrics.total_time_ms,
        ctx.metrics.chunks_retrieved,
        ctx.metrics.chunks_returned
    );

    Ok(())
}

/// 채팅 명령어 (chat)
async fn cmd_chat(message: &str, conversation: Option<String>, no_rag: bool) -> Result<()> {
    let orchestrator = init_orchestrator().await?;

    println!("[*] 응답 생성 중...\n");

    let reply = orchestrator
        .chat(message, conversation.as_deref(), !no_rag)
        .await
        .context("채팅 실패")?;

    println!("{}", reply.content);
    println!();

    if !reply.sources.is_empty() {
        println!("[*] 참조 소스: {}", reply.sources.join(", "));
    }
    println!("[*] 대화 ID: {} (모델: {})", reply.conversation_id, reply.model);

    Ok(())
}

/// 대화 목록 명령어 (conversations)
async fn cmd_conversations(limit: usize) -> Result<()> {
    let orchestrator = init_orchestrator().await?;
    let conversations = orchestrator.list_conversations(limit).await;

    if conversations.is_empty() {
        println!("[!] 활성 대화가 없습니다.");
        return Ok(());
    }

    println!("[OK] 활성 대화 ({} 건):\n", conversations.len());

    for summary in conversations {
        println!("  {} ({} 메시지)", summary.id, summary.message_count);
        println!(
            "        시작 {} / 마지막 활동 {}",
            summary.created_at.format("%Y-%m-%d %H:%M"),
            summary.last_activity.format("%Y-%m-%d %H:%M")
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(source: Option<String>, conversation: Option<String>) -> Result<()> {
    let orchestrator = init_orchestrator().await?;

    if let Some(ref source) = source {
        let deleted = orchestrator
            .delete_source(source)
            .await
            .context("문서 삭제 실패")?;

        if deleted > 0 {
            println!("[OK] 소스 '{}' 삭제됨 ({} 청크)", source, deleted);
        } else {
            println!("[!] 소스 '{}'의 청크를 찾을 수 없습니다", source);
        }
    } else if let Some(ref conv_id) = conversation {
        if orchestrator.delete_conversation(conv_id).await {
            println!("[OK] 대화 {} 삭제됨", conv_id);
        } else {
            println!("[!] 대화 {}를 찾을 수 없습니다", conv_id);
        }
    } else {
        bail!("--source 또는 --conversation 중 하나를 지정해야 합니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("allma-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    match init_orchestrator().await {
        Ok(orchestrator) => {
            let status = orchestrator.status().await.context("상태 조회 실패")?;

            println!("[OK] 벡터 인덱스: {} 청크 ({})", status.chunk_count, status.vector_backend);
            println!(
                "[OK] 임베딩 모델: {} (차원: {})",
                status.embedding_model, status.embedding_dimension
            );
            println!("[OK] 생성 모델: {}", status.generation_model);
            println!("[OK] 활성 대화: {} 건", status.active_conversations);
        }
        Err(e) => {
            println!("[!] 초기화 실패: {:#}", e);
            println!("    Ollama 확인: curl http://localhost:11434/api/tags");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
