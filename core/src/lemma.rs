use crate::html::visible_text;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Shortest token, in characters, handed to the analyzer.
const MIN_TOKEN_CHARS: usize = 3;
/// Canonical forms shorter than this are not counted; query lemma sets keep them.
const MIN_LEMMA_CHARS: usize = 3;

lazy_static! {
    static ref NOT_RUSSIAN: Regex = Regex::new(r"[^а-яё\s]+").expect("valid regex");
    static ref NOT_ENGLISH: Regex = Regex::new(r"[^a-z\s]+").expect("valid regex");
    static ref RUSSIAN_FUNCTION_WORDS: HashMap<&'static str, WordTag> = function_words(
        &["и", "а", "но", "или", "либо", "что", "чтобы", "если", "когда", "как", "потому", "поэтому",
          "хотя", "тоже", "также", "зато", "однако", "пока", "будто", "словно", "итак", "ибо",
          "причем", "притом", "затем", "лишь", "едва", "нежели", "дабы", "коли", "ежели"],
        &["не", "ни", "же", "ли", "бы", "вот", "вон", "даже", "только", "уже", "еще", "ещё",
          "разве", "неужели", "именно", "почти", "пусть", "пускай", "давай", "нет", "да", "ведь",
          "лишь", "уж", "вроде", "якобы", "авось", "всего", "просто"],
        &["в", "во", "без", "до", "из", "к", "ко", "на", "по", "о", "об", "обо", "от", "ото",
          "перед", "пред", "при", "через", "с", "со", "у", "за", "над", "под", "про", "для",
          "между", "около", "вокруг", "после", "среди", "кроме", "вместо", "сквозь", "ради",
          "возле", "вдоль", "мимо", "внутри", "согласно", "благодаря", "навстречу", "против",
          "насчет", "вследствие", "ввиду", "вопреки", "подле", "позади"],
        &["ах", "ох", "эх", "ой", "увы", "ура", "ага", "эй", "браво", "алло", "тьфу", "фу", "ого",
          "ух", "ай", "ишь", "цыц", "караул", "батюшки"],
    );
    static ref ENGLISH_FUNCTION_WORDS: HashMap<&'static str, WordTag> = function_words(
        &["and", "but", "or", "nor", "yet", "so", "because", "although", "though", "while", "if",
          "unless", "since", "whereas", "whether", "than", "either", "neither", "both"],
        &["not", "to", "the", "a", "an", "up", "out", "off", "just", "only", "even"],
        &["about", "above", "across", "after", "against", "along", "among", "around", "at",
          "before", "behind", "below", "beneath", "beside", "between", "beyond", "by", "down",
          "during", "except", "for", "from", "in", "inside", "into", "near", "of", "on", "onto",
          "outside", "over", "past", "through", "throughout", "toward", "towards", "under",
          "underneath", "until", "upon", "with", "within", "without", "via", "per"],
        &["oh", "wow", "hey", "alas", "ouch", "hooray", "oops", "hmm", "ugh", "yay", "bravo"],
    );
}

fn function_words(
    conjunctions: &[&'static str],
    particles: &[&'static str],
    prepositions: &[&'static str],
    interjections: &[&'static str],
) -> HashMap<&'static str, WordTag> {
    let mut map = HashMap::new();
    for (words, tag) in [
        (conjunctions, WordTag::Conjunction),
        (particles, WordTag::Particle),
        (prepositions, WordTag::Preposition),
        (interjections, WordTag::Interjection),
    ] {
        for word in words {
            map.entry(*word).or_insert(tag);
        }
    }
    map
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Russian,
    English,
}

impl Language {
    fn non_letters(&self) -> &'static Regex {
        match self {
            Language::Russian => &NOT_RUSSIAN,
            Language::English => &NOT_ENGLISH,
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            Language::Russian => Algorithm::Russian,
            Language::English => Algorithm::English,
        }
    }

    fn function_words(&self) -> &'static HashMap<&'static str, WordTag> {
        match self {
            Language::Russian => &RUSSIAN_FUNCTION_WORDS,
            Language::English => &ENGLISH_FUNCTION_WORDS,
        }
    }
}

/// Grammatical tag of one candidate reading of a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordTag {
    Conjunction,
    Particle,
    Preposition,
    Interjection,
    Content,
}

impl WordTag {
    pub fn is_function_word(&self) -> bool {
        !matches!(self, WordTag::Content)
    }
}

/// Dictionary lookups for one language. Input is a single lowercase word.
pub trait Morphology: Send + Sync {
    fn tags(&self, word: &str) -> Vec<WordTag>;
    fn normal_forms(&self, word: &str) -> Vec<String>;
}

/// Snowball stems as canonical forms, function words from a fixed table.
pub struct SnowballMorphology {
    stemmer: Stemmer,
    function_words: &'static HashMap<&'static str, WordTag>,
}

impl SnowballMorphology {
    pub fn new(language: Language) -> Self {
        Self { stemmer: Stemmer::create(language.algorithm()), function_words: language.function_words() }
    }
}

impl Morphology for SnowballMorphology {
    fn tags(&self, word: &str) -> Vec<WordTag> {
        vec![self.function_words.get(word).copied().unwrap_or(WordTag::Content)]
    }

    fn normal_forms(&self, word: &str) -> Vec<String> {
        vec![self.stemmer.stem(word).into_owned()]
    }
}

/// Text to lemma pipeline. Stateless apart from the analyzer, so one instance is shared freely.
pub struct LemmaExtractor {
    language: Language,
    morphology: Box<dyn Morphology>,
}

impl LemmaExtractor {
    pub fn new(language: Language) -> Self {
        Self::with_morphology(language, Box::new(SnowballMorphology::new(language)))
    }

    pub fn with_morphology(language: Language, morphology: Box<dyn Morphology>) -> Self {
        Self { language, morphology }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Lemma -> number of tokens in the visible text of `html` that reduce to it.
    pub fn lemma_frequencies(&self, html: &str) -> HashMap<String, u32> {
        let mut lemmas = HashMap::new();
        for word in self.words(&visible_text(html)) {
            if self.is_function_word(&word) {
                continue;
            }
            if let Some(lemma) = self.morphology.normal_forms(&word).into_iter().next() {
                if lemma.chars().count() >= MIN_LEMMA_CHARS {
                    *lemmas.entry(lemma).or_insert(0) += 1;
                }
            }
        }
        lemmas
    }

    /// Distinct lemmas of a query; every candidate normal form is kept.
    pub fn lemma_set(&self, text: &str) -> HashSet<String> {
        self.words(&visible_text(text))
            .into_iter()
            .filter(|word| !self.is_function_word(word))
            .flat_map(|word| self.morphology.normal_forms(&word))
            .collect()
    }

    fn is_function_word(&self, word: &str) -> bool {
        self.morphology.tags(word).iter().any(WordTag::is_function_word)
    }

    fn words(&self, text: &str) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        self.language
            .non_letters()
            .replace_all(&normalized, " ")
            .split_whitespace()
            .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
            .map(str::to_string)
            .collect()
    }
}
