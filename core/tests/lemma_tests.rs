use sitesearch_core::lemma::{Language, LemmaExtractor, Morphology, WordTag};

#[test]
fn it_stems_and_counts_tokens() {
    let ex = LemmaExtractor::new(Language::English);
    let lemmas = ex.lemma_frequencies("<html><body><h1>Running</h1><p>Runners RUN! Run again.</p></body></html>");
    assert_eq!(lemmas.get("run"), Some(&3));
    assert_eq!(lemmas.get("runner"), Some(&1));
    assert!(!lemmas.keys().any(|l| l.chars().count() < 3));
}

#[test]
fn it_ignores_markup_and_scripts() {
    let ex = LemmaExtractor::new(Language::English);
    let lemmas = ex.lemma_frequencies(
        "<html><head><script>function hidden() {}</script></head><body><div class=\"wrapper\">garden</div></body></html>",
    );
    assert_eq!(lemmas.len(), 1);
    assert!(lemmas.contains_key("garden"));
}

#[test]
fn it_is_deterministic() {
    let ex = LemmaExtractor::new(Language::Russian);
    let html = "<p>Повторное появление леопарда в Осетии позволяет предположить, что леопард постоянно обитает в некоторых районах Северного Кавказа.</p>";
    let first = ex.lemma_frequencies(html);
    for _ in 0..5 {
        assert_eq!(ex.lemma_frequencies(html), first);
    }
    assert!(!first.is_empty());
}

#[test]
fn it_keeps_only_the_language_letters() {
    let ex = LemmaExtractor::new(Language::Russian);
    let lemmas = ex.lemma_frequencies("<p>hello мир2024 world</p>");
    assert!(lemmas.keys().all(|l| l.chars().all(|c| ('а'..='я').contains(&c) || c == 'ё')));
}

#[test]
fn query_set_is_distinct() {
    let ex = LemmaExtractor::new(Language::English);
    let set = ex.lemma_set("running runs and the runner");
    assert!(set.contains("run"));
    assert!(set.contains("runner"));
    assert!(!set.contains("and"));
    assert_eq!(set.len(), 2);
}

struct FixedMorphology;

impl Morphology for FixedMorphology {
    fn tags(&self, word: &str) -> Vec<WordTag> {
        match word {
            "however" => vec![WordTag::Content, WordTag::Conjunction],
            _ => vec![WordTag::Content],
        }
    }

    fn normal_forms(&self, word: &str) -> Vec<String> {
        match word {
            "mice" => vec!["mouse".to_string()],
            "ox" | "oxen" => vec!["ox".to_string()],
            other => vec![other.to_string()],
        }
    }
}

#[test]
fn any_function_tag_discards_the_token() {
    let ex = LemmaExtractor::with_morphology(Language::English, Box::new(FixedMorphology));
    let lemmas = ex.lemma_frequencies("<p>However the mice and mice</p>");
    assert!(!lemmas.contains_key("however"));
    assert_eq!(lemmas.get("mouse"), Some(&2));
    assert_eq!(lemmas.get("the"), Some(&1));
}

#[test]
fn short_forms_are_counted_out_but_kept_in_queries() {
    let ex = LemmaExtractor::with_morphology(Language::English, Box::new(FixedMorphology));
    let lemmas = ex.lemma_frequencies("<p>oxen with mice</p>");
    assert!(!lemmas.contains_key("ox"));
    assert_eq!(lemmas.get("mouse"), Some(&1));

    let set = ex.lemma_set("however oxen mice");
    assert!(set.contains("ox"));
    assert!(set.contains("mouse"));
    assert!(!set.contains("however"));
}
