use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

/// English stop words dropped from Latin-script runs.
pub const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Splits text into index terms.
///
/// CJK ideographs, kana and hangul become one term per character. Everything
/// else goes through a tantivy analyzer (alphanumeric words, lower-cased,
/// stop words removed).
#[derive(Clone)]
pub struct Analyzer {
	latin: TextAnalyzer,
}

impl Default for Analyzer {
	fn default() -> Self {
		Self::new()
	}
}

impl Analyzer {
	pub fn new() -> Self {
		let latin = TextAnalyzer::builder(SimpleTokenizer::default())
			.filter(LowerCaser)
			.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
			.build();
		Self { latin }
	}

	pub fn tokenize(&self, text: &str) -> Vec<String> {
		let mut analyzer = self.latin.clone();
		let mut terms = Vec::new();
		let mut run_start: Option<usize> = None;
		for (pos, ch) in text.char_indices() {
			if is_cjk(ch) {
				if let Some(start) = run_start.take() {
					push_latin(&mut analyzer, &text[start..pos], &mut terms);
				}
				terms.push(ch.to_string());
			} else if run_start.is_none() {
				run_start = Some(pos);
			}
		}
		if let Some(start) = run_start {
			push_latin(&mut analyzer, &text[start..], &mut terms);
		}
		terms
	}
}

fn push_latin(analyzer: &mut TextAnalyzer, run: &str, terms: &mut Vec<String>) {
	let mut stream = analyzer.token_stream(run);
	while stream.advance() {
		terms.push(stream.token().text.clone());
	}
}

pub fn is_cjk(ch: char) -> bool {
	matches!(ch as u32,
		0x4E00..=0x9FFF      // CJK unified ideographs
		| 0x3400..=0x4DBF    // extension A
		| 0xF900..=0xFAFF    // compatibility ideographs
		| 0x3040..=0x30FF    // hiragana, katakana
		| 0xAC00..=0xD7AF    // hangul syllables
		| 0x20000..=0x2A6DF  // extension B
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn latin_words_are_lowercased_without_stop_words() {
		let a = Analyzer::new();
		assert_eq!(a.tokenize("The Apple releases a NEW phone"), vec!["apple", "releases", "new", "phone"]);
	}

	#[test]
	fn cjk_is_split_per_character() {
		let a = Analyzer::new();
		assert_eq!(a.tokenize("人工智能。"), vec!["人", "工", "智", "能"]);
	}

	#[test]
	fn mixed_runs_keep_order() {
		let a = Analyzer::new();
		assert_eq!(a.tokenize("GPU加速 training"), vec!["gpu", "加", "速", "training"]);
	}
}
