//! Vietnamese word segmentation for the lexical index.
//!
//! Vietnamese writes one syllable per whitespace-delimited token, and most
//! words span several syllables (`pháp luật`, `người lao động`). Indexing
//! raw syllables makes BM25 match `lao` in unrelated contexts, so both
//! child chunks and queries are segmented into words first.
//!
//! The segmenter lowercases text, strips leading/trailing punctuation from
//! each token (identifiers such as `15/2020/NĐ-CP` keep their inner
//! punctuation), and groups syllables by longest match against a lexicon.
//! Grouped syllables are joined with `_`, so `người lao động` becomes the
//! single token `người_lao_động`. Matching never crosses punctuation.
//!
//! The segmenter used at build time is stored in the retrieval artifacts,
//! so queries are always split with the lexicon the children were indexed
//! with.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Legal vocabulary used when no dictionary file is configured.
const BUILTIN_LEXICON: &str = "\
người sử dụng lao động
trách nhiệm hữu hạn
ủy ban nhân dân
hợp đồng lao động
vi phạm hành chính
quyền sử dụng đất
bảo hiểm xã hội
bảo hiểm y tế
bảo hiểm thất nghiệp
thu nhập cá nhân
sở hữu trí tuệ
phạm vi điều chỉnh
đối tượng áp dụng
quyết định hành chính
người lao động
người nước ngoài
nồng độ cồn
giấy chứng nhận
viện kiểm sát
hết hiệu lực
còn hiệu lực
giải thích từ ngữ
pháp luật
pháp lý
nghị định
nghị quyết
thông tư
quyết định
bộ luật
luật sư
hiến pháp
hợp đồng
lao động
doanh nghiệp
đất đai
xử phạt
vi phạm
hành chính
hình sự
dân sự
tố tụng
tòa án
cơ quan
nhà nước
chính phủ
quốc hội
ủy ban
nhân dân
hiệu lực
thi hành
ban hành
quy định
điều khoản
trách nhiệm
nghĩa vụ
quyền lợi
bảo hiểm
xã hội
thu nhập
cá nhân
tổ chức
công dân
hôn nhân
gia đình
thừa kế
di chúc
tài sản
sở hữu
bồi thường
thiệt hại
tranh chấp
khiếu nại
tố cáo
giải quyết
thủ tục
hồ sơ
đăng ký
kinh doanh
đầu tư
giao thông
đường bộ
mức phạt
tiền lương
thời giờ
làm việc
nghỉ ngơi
chấm dứt
sa thải
trợ cấp
thôi việc
thất nghiệp
kỷ luật
văn bản
quy phạm
phạm vi
điều chỉnh
đối tượng
áp dụng
giải thích
từ ngữ
cư trú
căn cước
công an
nhà ở
xây dựng
môi trường
y tế
giáo dục
thương mại
cạnh tranh
trí tuệ
phá sản
cổ phần
công ty
hữu hạn
vốn điều lệ
điều lệ
nước ngoài
thời hạn
thời hiệu
khởi kiện
bị đơn
nguyên đơn
bản án
người dân
quyền và nghĩa vụ
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmenter {
    lexicon: BTreeSet<String>,
    max_syllables: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    /// Segmenter with the built-in legal vocabulary.
    pub fn new() -> Self {
        Self::empty().with_dictionary(BUILTIN_LEXICON)
    }

    /// Segmenter with no multi-syllable words (every syllable is a token).
    pub fn empty() -> Self {
        Self {
            lexicon: BTreeSet::new(),
            max_syllables: 1,
        }
    }

    /// Add words from dictionary text: one word per line, syllables
    /// separated by spaces or `_`; blank lines and `#` comments ignored.
    pub fn with_dictionary(mut self, text: &str) -> Self {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_word(line);
        }
        self
    }

    pub fn add_word(&mut self, word: &str) {
        let syllables: Vec<String> = word
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '_')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if syllables.len() < 2 {
            return;
        }
        self.max_syllables = self.max_syllables.max(syllables.len());
        self.lexicon.insert(syllables.join(" "));
    }

    pub fn lexicon_len(&self) -> usize {
        self.lexicon.len()
    }

    /// Segment text into lowercase word tokens.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut run: Vec<String> = Vec::new();

        for raw in text.split_whitespace() {
            let lowered = raw.to_lowercase();
            let trimmed = lowered.trim_matches(|c: char| !c.is_alphanumeric());
            let breaks_after = lowered.ends_with(|c: char| !c.is_alphanumeric());
            let breaks_before = lowered.starts_with(|c: char| !c.is_alphanumeric());

            if breaks_before {
                self.flush_run(&mut run, &mut tokens);
            }
            if !trimmed.is_empty() {
                run.push(trimmed.to_string());
            }
            if breaks_after {
                self.flush_run(&mut run, &mut tokens);
            }
        }
        self.flush_run(&mut run, &mut tokens);
        tokens
    }

    /// Longest-match grouping of a punctuation-free run of syllables.
    fn flush_run(&self, run: &mut Vec<String>, out: &mut Vec<String>) {
        let mut i = 0;
        while i < run.len() {
            let longest = self.max_syllables.min(run.len() - i);
            let mut taken = 1;
            for n in (2..=longest).rev() {
                if self.lexicon.contains(&run[i..i + n].join(" ")) {
                    taken = n;
                    break;
                }
            }
            out.push(run[i..i + taken].join("_"));
            i += taken;
        }
        run.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_compound_words() {
        let seg = Segmenter::new();
        assert_eq!(
            seg.segment("Người lao động có quyền đơn phương chấm dứt hợp đồng lao động"),
            vec![
                "người_lao_động",
                "có",
                "quyền",
                "đơn",
                "phương",
                "chấm_dứt",
                "hợp_đồng_lao_động"
            ]
        );
    }

    #[test]
    fn test_longest_match_wins() {
        let seg = Segmenter::new();
        assert_eq!(seg.segment("Ủy ban nhân dân tỉnh"), vec!["ủy_ban_nhân_dân", "tỉnh"]);
    }

    #[test]
    fn test_keeps_legal_identifiers() {
        let seg = Segmenter::new();
        assert_eq!(
            seg.segment("Theo Nghị định 15/2020/NĐ-CP."),
            vec!["theo", "nghị_định", "15/2020/nđ-cp"]
        );
    }

    #[test]
    fn test_punctuation_breaks_grouping() {
        let seg = Segmenter::new();
        assert_eq!(seg.segment("pháp, luật"), vec!["pháp", "luật"]);
        assert_eq!(seg.segment("(pháp luật)"), vec!["pháp_luật"]);
    }

    #[test]
    fn test_custom_dictionary() {
        let seg = Segmenter::empty().with_dictionary("# comment\n\nđơn_phương\n  chấm dứt  \nx\n");
        assert_eq!(seg.lexicon_len(), 2);
        assert_eq!(
            seg.segment("đơn phương chấm dứt"),
            vec!["đơn_phương", "chấm_dứt"]
        );
    }

    #[test]
    fn test_empty_and_symbol_only_input() {
        let seg = Segmenter::new();
        assert!(seg.segment("").is_empty());
        assert!(seg.segment(" -- ... ").is_empty());
    }
}
