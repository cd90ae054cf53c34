use crate::config::AnalyzerConfig;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref SPLIT: Regex = Regex::new(r"[\s\-]+").expect("valid regex");
    static ref ENGLISH: Stemmer = Stemmer::create(Algorithm::English);
    static ref RUSSIAN: Stemmer = Stemmer::create(Algorithm::Russian);
    static ref DEFAULT_STOPWORDS: HashSet<String> = {
        let english: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could","did","do","does","doing","down","during",
            "each","few","for","from","further","had","has","have","having","he","her","here","hers",
            "him","his","how","i","if","in","into","is","it","its","itself","me","more","most","my",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","out","over","own",
            "same","she","should","so","some","such","than","that","the","their","theirs","them","then",
            "there","these","they","this","those","through","to","too","under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","with","would",
            "you","your","yours",
        ];
        let russian: &[&str] = &[
            "и","в","во","не","что","он","на","я","с","со","как","а","то","все","она","так","его",
            "но","да","ты","к","у","же","вы","за","бы","по","только","ее","мне","было","вот","от",
            "меня","еще","нет","о","из","ему","теперь","когда","уже","вам","ни","быть","был","него",
            "до","вас","нибудь","опять","уж","ведь","там","потом","себя","ничего","ей","может","они",
            "тут","где","есть","надо","ней","для","мы","тебя","их","чем","была","сам","чтоб","без",
            "будто","чего","раз","тоже","себе","под","будет","ж","тогда","кто","этот","того","потому",
            "этого","какой","совсем","ним","здесь","этом","один","почти","мой","тем","чтобы","нее",
            "сейчас","были","куда","зачем","всех","можно","при","над","чуть","том","такой","им",
            "более","всего",
        ];
        english.iter().chain(russian.iter()).map(|w| w.to_string()).collect()
    };
}

/// Canonical form of `text`: NFKC, lowercase, `ё` folded to `е`, every char that is not
/// alphanumeric or a hyphen turned into a space, whitespace collapsed.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.nfkc().flat_map(char::to_lowercase).nfkc() {
        let c = if c == 'ё' { 'е' } else { c };
        if c.is_alphanumeric() || c == '-' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}')
}

fn latin_to_cyrillic(c: char) -> Option<&'static str> {
    Some(match c {
        'a' => "а", 'b' => "б", 'c' => "к", 'd' => "д", 'e' => "е", 'f' => "ф", 'g' => "г",
        'h' => "х", 'i' => "и", 'j' => "дж", 'k' => "к", 'l' => "л", 'm' => "м", 'n' => "н",
        'o' => "о", 'p' => "п", 'q' => "к", 'r' => "р", 's' => "с", 't' => "т", 'u' => "у",
        'v' => "в", 'w' => "в", 'x' => "кс", 'y' => "и", 'z' => "з",
        _ => return None,
    })
}

fn latin_digraph(a: char, b: char) -> Option<&'static str> {
    Some(match (a, b) {
        ('s', 'h') => "ш", ('c', 'h') => "ч", ('z', 'h') => "ж", ('k', 'h') => "х",
        ('t', 's') => "ц", ('y', 'a') => "я", ('y', 'u') => "ю", ('y', 'o') => "е",
        _ => return None,
    })
}

fn cyrillic_to_latin(c: char) -> Option<&'static str> {
    Some(match c {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d", 'е' => "e", 'ж' => "zh",
        'з' => "z", 'и' => "i", 'й' => "y", 'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n",
        'о' => "o", 'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t", 'у' => "u", 'ф' => "f",
        'х' => "kh", 'ц' => "ts", 'ч' => "ch", 'ш' => "sh", 'щ' => "shch", 'ъ' => "", 'ы' => "y",
        'ь' => "", 'э' => "e", 'ю' => "yu", 'я' => "ya",
        _ => return None,
    })
}

/// Cross-script variant of canonical text: Latin letters become their Cyrillic phonetic
/// equivalents and Cyrillic letters their Latin ones. `None` when nothing changes.
pub fn transliterate(canonical: &str) -> Option<String> {
    let chars: Vec<char> = canonical.chars().collect();
    let mut out = String::with_capacity(canonical.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(next) = chars.get(i + 1) {
            if let Some(s) = latin_digraph(c, *next) {
                out.push_str(s);
                i += 2;
                continue;
            }
        }
        match latin_to_cyrillic(c).or_else(|| cyrillic_to_latin(c)) {
            Some(s) => out.push_str(s),
            None => out.push(c),
        }
        i += 1;
    }
    let out = normalize(&out);
    if out == canonical { None } else { Some(out) }
}

/// Stop-word filtering and stemming over canonical text.
#[derive(Debug, Clone)]
pub struct Analyzer {
    stopwords: HashSet<String>,
    transliterate: bool,
    min_token_chars: usize,
    stemming: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl Analyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let stopwords = match &config.stopwords {
            Some(list) => list.iter().map(|w| normalize(w)).collect(),
            None => DEFAULT_STOPWORDS.clone(),
        };
        Self {
            stopwords,
            transliterate: config.transliterate,
            min_token_chars: config.min_token_chars,
            stemming: config.stemming,
        }
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// Split canonical text on whitespace and hyphens, drop stop-words and short words, stem.
    pub fn tokenize(&self, canonical: &str) -> Vec<String> {
        SPLIT
            .split(canonical)
            .filter(|w| !w.is_empty())
            .filter(|w| !self.is_stopword(w))
            .filter(|w| w.chars().count() >= self.min_token_chars)
            .map(|w| self.stem(w))
            .collect()
    }

    pub fn stem(&self, word: &str) -> String {
        if !self.stemming {
            return word.to_string();
        }
        if word.chars().any(is_cyrillic) {
            RUSSIAN.stem(word).to_string()
        } else {
            ENGLISH.stem(word).to_string()
        }
    }

    /// Query-side analysis: `tokenize(normalize(text))`.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        self.tokenize(&normalize(text))
    }

    /// Document-side analysis: the canonical tokens followed by the tokens of the
    /// transliterated variant, when enabled and different.
    pub fn analyze_with_variants(&self, text: &str) -> Vec<String> {
        let canonical = normalize(text);
        let mut tokens = self.tokenize(&canonical);
        if self.transliterate {
            if let Some(variant) = transliterate(&canonical) {
                tokens.extend(self.tokenize(&variant));
            }
        }
        tokens
    }
}
