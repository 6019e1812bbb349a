/// Splits a document into chunks of at most `max_words` words. Paragraphs are
/// kept together while they fit; longer paragraphs are cut on word boundaries.
pub fn chunk_document(body: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for paragraph in body.split("\n\n") {
        let words = paragraph.split_whitespace().collect::<Vec<_>>();
        if words.is_empty() {
            continue;
        }

        if current.len() + words.len() > max_words && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
        }

        for word in words {
            if current.len() == max_words {
                chunks.push(current.join(" "));
                current.clear();
            }
            current.push(word);
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
