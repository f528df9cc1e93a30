//! 텍스트 분할기 - 재귀적 구분자 인식 분할
//!
//! 우선순위가 매겨진 구분자(문단 > 줄 > 문장 > 절 > 단어 > 문자)를
//! 순서대로 시도하며 목표 크기 이하의 청크를 만듭니다.
//! 분할 후 각 청크 앞에 이전 청크의 끝부분을 오버랩으로 붙입니다.
//!
//! 동일한 입력과 설정은 항상 동일한 청크 목록을 생성합니다 (멱등 수집의 전제).

use regex::Regex;

use crate::error::{RagError, Result};

/// 기본 구분자 목록 (우선순위 순)
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// TextSplitter
// ============================================================================

/// 재귀적 텍스트 분할기
///
/// 크기 계산은 문자(char) 수 기준입니다. 조각을 이어붙일 때는
/// 소스에서 소비된 구분자 길이까지 예산에 포함합니다
/// (청크가 담당하는 원문 구간 기준 예산).
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// 새 분할기 생성
    ///
    /// # Errors
    /// `chunk_size`가 0이거나 오버랩이 청크 크기 이상이면 `InvalidInput`
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidInput(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidInput(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    /// 기본 구분자로 생성
    pub fn with_defaults(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, default_separators())
    }

    /// 텍스트를 청크로 분할
    ///
    /// 빈 입력 또는 공백만 있는 입력은 빈 목록을 반환합니다.
    /// 모든 청크는 앞뒤 공백이 제거되며, 제거 후 비는 청크는 버려집니다.
    pub fn split(&self, text: &str) -> Vec<String> {
        let cores: Vec<String> = self
            .recursive_split(text, &self.separators)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        self.apply_overlap(cores)
    }

    /// 재귀 분할 (오버랩 미적용 코어 청크 생성)
    fn recursive_split(&self, text: &str, separators: &[String]) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        if char_len(text) <= self.chunk_size {
            return vec![text.trim().to_string()];
        }

        // 텍스트에 존재하는 첫 구분자 시도
        for (i, sep) in separators.iter().enumerate() {
            if !sep.is_empty() && text.contains(sep.as_str()) {
                return self.split_with_separator(text, sep, &separators[i + 1..]);
            }
        }

        // 적용 가능한 구분자 없음 - 고정 폭 분할
        self.split_by_size(text)
    }

    /// 특정 구분자로 분할 후 탐욕적 재조립
    ///
    /// 현재 청크에 다음 조각을 (구분자로 이어) 추가했을 때 소비된 구분자
    /// 몫까지 포함한 길이가 예산을 넘으면 청크를 닫습니다. 조각 하나가
    /// 이미 예산을 넘으면 남은 하위 구분자로 재귀합니다.
    fn split_with_separator(
        &self,
        text: &str,
        separator: &str,
        remaining: &[String],
    ) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in text.split(separator) {
            if piece.trim().is_empty() {
                continue;
            }

            let candidate_len = if current.is_empty() {
                char_len(piece)
            } else {
                char_len(&current) + sep_len + char_len(piece)
            };

            // 소비된 구분자 몫(sep_len)을 예산에 포함
            if candidate_len + sep_len <= self.chunk_size {
                if !current.is_empty() {
                    current.push_str(separator);
                }
                current.push_str(piece);
                continue;
            }

            // 현재 청크 닫기
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            current = String::new();

            if char_len(piece) > self.chunk_size {
                // 조각 자체가 예산 초과 - 하위 구분자로 재귀
                chunks.extend(self.recursive_split(piece, remaining));
            } else {
                current = piece.to_string();
            }
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    /// 고정 폭 분할 (최후 수단)
    ///
    /// 윈도우 중간점 이후에 단어 경계가 있으면 거기서 자릅니다.
    fn split_by_size(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let mut cut = end;

            // 윈도우 끝이 아니라면 중간점 이후의 마지막 공백에서 절단
            if end < chars.len() {
                let mid = self.chunk_size / 2;
                if let Some(rel) = chars[start..end]
                    .iter()
                    .rposition(|c| c.is_whitespace())
                    .filter(|&rel| rel > mid)
                {
                    cut = start + rel;
                }
            }

            let chunk: String = chars[start..cut].iter().collect();
            let chunk = chunk.trim().to_string();
            if !chunk.is_empty() {
                chunks.push(chunk);
            }

            // 절단 지점의 공백은 다음 윈도우 선두에서 trim으로 제거됨
            start = if cut > start { cut } else { end };
        }

        chunks
    }

    /// 오버랩 적용
    ///
    /// 첫 청크를 제외한 모든 청크 앞에 이전 청크의 끝부분
    /// (`chunk_overlap` 문자 이하)을 붙입니다. 단어 중간에서 시작하지
    /// 않도록 다음 공백 뒤로 당기며, 공백이 전혀 없으면 오버랩을 생략합니다.
    /// 윈도우가 이미 단어 경계에서 시작하면 그대로 사용합니다.
    fn apply_overlap(&self, cores: Vec<String>) -> Vec<String> {
        if self.chunk_overlap == 0 || cores.len() < 2 {
            return cores;
        }

        let mut result = Vec::with_capacity(cores.len());
        result.push(cores[0].clone());

        for i in 1..cores.len() {
            let prev = &cores[i - 1];
            let prev_len = char_len(prev);

            let overlap = if prev_len <= self.chunk_overlap {
                // 이전 청크 전체가 오버랩 (단어 경계에서 시작)
                prev.as_str()
            } else {
                let window = char_suffix(prev, self.chunk_overlap);
                let window_start = prev.len() - window.len();
                let before = prev[..window_start].chars().next_back();

                if before.map(char::is_whitespace).unwrap_or(true) {
                    // 윈도우 직전이 공백 - 이미 단어 경계에 정렬됨
                    window
                } else {
                    // 단어 중간 절단 - 다음 공백 뒤로 이동 (멀티바이트 공백 안전)
                    match window.char_indices().find(|(_, c)| c.is_whitespace()) {
                        Some((pos, ws)) => &window[pos + ws.len_utf8()..],
                        None => "",
                    }
                }
            };

            let overlap = overlap.trim();
            if overlap.is_empty() {
                result.push(cores[i].clone());
            } else {
                result.push(format!("{} {}", overlap, cores[i]));
            }
        }

        result
    }
}

// ============================================================================
// Text Normalization
// ============================================================================

/// 수집 전 텍스트 정규화
///
/// 줄바꿈 통일, 널 바이트 제거, 공백 런 축소, 과도한 빈 줄 축소.
/// 문단 경계(`\n\n`)는 보존합니다.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text.replace('\0', "");

    // 줄 내부의 연속 공백/탭 축소
    let spaces = Regex::new(r"[ \t]+").expect("valid regex");
    let text = spaces.replace_all(&text, " ");

    // 3줄 이상의 빈 줄을 문단 경계로 축소
    let newlines = Regex::new(r"\n{3,}").expect("valid regex");
    let text = newlines.replace_all(&text, "\n\n");

    text.trim().to_string()
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 마지막 n개 문자로 이루어진 접미사 (UTF-8 안전)
fn char_suffix(s: &str, n: usize) -> &str {
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => "",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::with_defaults(size, overlap).unwrap()
    }

    #[test]
    fn test_empty_input() {
        let s = splitter(100, 10);
        assert!(s.split("").is_empty());
        assert!(s.split("   \n\n  \t ").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let s = splitter(100, 10);
        let chunks = s.split("Hello world.");
        assert_eq!(chunks, vec!["Hello world."]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(TextSplitter::with_defaults(0, 0).is_err());
        assert!(TextSplitter::with_defaults(10, 10).is_err());
        assert!(TextSplitter::with_defaults(10, 20).is_err());
    }

    #[test]
    fn test_sentence_split_example() {
        // "A. B. C." / chunk_size=4 / overlap=0 / separators=[". "]
        let s = TextSplitter::new(4, 0, vec![". ".to_string()]).unwrap();
        let chunks = s.split("A. B. C.");
        assert_eq!(chunks, vec!["A", "B", "C."]);
    }

    #[test]
    fn test_determinism() {
        let s = splitter(50, 10);
        let text = "First paragraph here.\n\nSecond paragraph with more words in it.\n\nThird one.";
        let a = s.split(text);
        let b = s.split(text);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_chunk_size_bound() {
        let s = splitter(40, 0);
        let text = "one two three four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen sixteen";
        for chunk in s.split(text) {
            assert!(
                chunk.chars().count() <= 40,
                "chunk too long: {:?} ({} chars)",
                chunk,
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn test_paragraph_boundary_preferred() {
        let s = splitter(30, 0);
        let text = "Short paragraph one.\n\nShort paragraph two.";
        let chunks = s.split(text);
        assert_eq!(chunks, vec!["Short paragraph one.", "Short paragraph two."]);
    }

    #[test]
    fn test_coverage_no_words_lost() {
        let s = splitter(25, 0);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = s.split(text);
        let rejoined = chunks.join(" ");
        let original_words: Vec<&str> = text.split_whitespace().collect();
        let rejoined_words: Vec<&str> = rejoined.split_whitespace().collect();
        assert_eq!(original_words, rejoined_words);
    }

    #[test]
    fn test_overlap_continuity() {
        let overlap = 15;
        let s = splitter(40, overlap);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi";
        let chunks = s.split(text);
        assert!(chunks.len() > 1);

        for i in 1..chunks.len() {
            // 오버랩 접두사는 이전 청크의 단어 경계 정렬 접미사
            let words: Vec<&str> = chunks[i].split_whitespace().collect();
            let first_word = words[0];
            assert!(
                chunks[i - 1].ends_with(first_word)
                    || chunks[i - 1].contains(&format!("{first_word} ")),
                "chunk {} prefix {:?} not found in previous chunk {:?}",
                i,
                first_word,
                chunks[i - 1]
            );
        }
    }

    #[test]
    fn test_overlap_prefix_is_previous_suffix() {
        let overlap = 12;
        let s = splitter(30, overlap);
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = s.split(text);
        assert!(chunks.len() > 1);

        for i in 1..chunks.len() {
            let prev = &chunks[i - 1];
            // 청크 i의 접두사 중 일부는 이전 청크의 접미사와 일치해야 함
            let mut matched = false;
            for (pos, _) in chunks[i].char_indices().take(overlap + 1) {
                let prefix = &chunks[i][..pos];
                if !prefix.is_empty() && prev.ends_with(prefix.trim_end()) {
                    matched = true;
                }
            }
            assert!(matched, "no shared overlap between {:?} and {:?}", prev, chunks[i]);
        }
    }

    #[test]
    fn test_fixed_width_fallback() {
        // 공백 없는 긴 토큰은 문자 단위로 절단
        let s = splitter(10, 0);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = s.split(text);
        assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn test_fixed_width_prefers_word_boundary() {
        let s = TextSplitter::new(10, 0, vec![]).unwrap();
        // 구분자 목록이 비어 고정 폭 경로로 직행, 중간점 이후 공백에서 절단
        let chunks = s.split("abcdefg hij klm");
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0], "abcdefg");
    }

    #[test]
    fn test_overlap_multibyte_whitespace() {
        // 오버랩 윈도우의 첫 공백이 멀티바이트(NBSP)여도 패닉 없이 분할
        let s = TextSplitter::new(6, 4, vec![" ".to_string()]).unwrap();
        let chunks = s.split("ab\u{a0}cd ef gh");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("cd"));

        // 전각 공백(U+3000)도 동일
        let s = TextSplitter::new(8, 5, vec![" ".to_string()]).unwrap();
        let chunks = s.split("가나\u{3000}다라마 바사 아자");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_overlap_window_already_word_aligned() {
        let s = splitter(20, 3);

        // 윈도우("cde") 직전이 공백이면 그대로 오버랩으로 사용
        let out = s.apply_overlap(vec!["ab cde".to_string(), "next".to_string()]);
        assert_eq!(out[1], "cde next");

        // 단어 중간에서 시작하고 내부에 공백이 없으면 오버랩 생략
        let out = s.apply_overlap(vec!["abcdef".to_string(), "next".to_string()]);
        assert_eq!(out[1], "next");
    }

    #[test]
    fn test_unicode_safe() {
        let s = splitter(10, 4);
        let text = "안녕하세요 세계 여러분 반갑습니다 오늘 날씨가 좋네요";
        let chunks = s.split(text);
        assert!(!chunks.is_empty());
        // 슬라이스 패닉 없이 전체 처리되는지 확인
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("a\r\nb"), "a\nb");
        assert_eq!(clean_text("a  \t b"), "a b");
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("  hi \0there  "), "hi there");
        // 문단 경계는 보존
        assert_eq!(clean_text("p1\n\np2"), "p1\n\np2");
    }

    #[test]
    fn test_char_suffix() {
        assert_eq!(char_suffix("hello", 3), "llo");
        assert_eq!(char_suffix("hello", 10), "hello");
        assert_eq!(char_suffix("안녕하세요", 2), "세요");
    }
}
