use rand::{thread_rng, Rng};
use tether_core::RelayFrame;

const TOKENS: &[&str] = &[
    "[", "]", "{", "}", ",", ":", "\"EVENT\"", "\"EOSE\"", "\"OK\"", "\"NOTICE\"", "\"CLOSED\"",
    "\"content\"", "\"id\"", "\"kind\"", "\"tags\"", "true", "null", "0", "-1", "1e999",
    "\"\\u0000\"", "\"s\"",
];

#[test]
fn fuzz_parse_random_text_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let text = String::from_utf8_lossy(&data);
        let _ = RelayFrame::parse(&text);
    }
}

#[test]
fn fuzz_parse_token_soup_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let count = rng.gen_range(0..24);
        let text: String = (0..count)
            .map(|_| TOKENS[rng.gen_range(0..TOKENS.len())])
            .collect();
        let _ = RelayFrame::parse(&text);
    }
}

#[test]
fn random_mutation_of_valid_event_frame_is_handled() {
    let mut rng = thread_rng();
    let frame = br#"["EVENT","sub",{"id":"ab","pubkey":"cd","created_at":1,"kind":30078,"tags":[["d","app_preferences"]],"content":"eA==","sig":"ef"}]"#;

    for _ in 0..2_000 {
        let mut mutated = frame.to_vec();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        if let Ok(RelayFrame::Event { event, .. }) =
            RelayFrame::parse(&String::from_utf8_lossy(&mutated))
        {
            let _ = event.verify();
            let _ = event.dedup_key();
        }
    }
}
