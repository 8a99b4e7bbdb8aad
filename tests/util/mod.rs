use deck_search::model::types::{CardFace, CardRecord, Color};
use deck_search::storage::sqlite::CardStore;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A store in a fresh temp dir. Keep the `TempDir` alive for the test.
#[allow(dead_code)]
pub fn temp_store() -> (TempDir, Arc<CardStore>) {
    let dir = TempDir::new().expect("tempdir");
    let store = CardStore::open(&dir.path().join("cards.db")).expect("open store");
    (dir, Arc::new(store))
}

/// Builder for paper-legal test cards.
#[allow(dead_code)]
pub struct CardBuilder(CardRecord);

#[allow(dead_code)]
impl CardBuilder {
    pub fn new(name: &str) -> Self {
        let mut card = CardRecord::new(name);
        card.games = vec!["paper".into()];
        card.set = Some("m21".into());
        card.border_color = Some("black".into());
        Self(card)
    }

    pub fn type_line(mut self, t: &str) -> Self {
        self.0.type_line = Some(t.into());
        self
    }

    pub fn text(mut self, t: &str) -> Self {
        self.0.oracle_text = Some(t.into());
        self
    }

    pub fn cmc(mut self, v: f64) -> Self {
        self.0.cmc = v;
        self
    }

    pub fn identity(mut self, colors: &[Color]) -> Self {
        self.0.color_identity = colors.iter().copied().collect();
        self
    }

    pub fn set(mut self, code: &str) -> Self {
        self.0.set = Some(code.into());
        self
    }

    pub fn set_type(mut self, t: &str) -> Self {
        self.0.set_type = Some(t.into());
        self
    }

    pub fn border(mut self, b: &str) -> Self {
        self.0.border_color = Some(b.into());
        self
    }

    pub fn digital_only(mut self) -> Self {
        self.0.games = vec!["arena".into()];
        self
    }

    pub fn oversized(mut self) -> Self {
        self.0.oversized = true;
        self
    }

    pub fn playtest(mut self) -> Self {
        self.0.promo_types = vec!["playtest".into()];
        self
    }

    pub fn triangle_stamp(mut self) -> Self {
        self.0.security_stamp = Some("triangle".into());
        self
    }

    pub fn faces(mut self, faces: &[(&str, &str, &str)]) -> Self {
        self.0.type_line = None;
        self.0.card_faces = Some(
            faces
                .iter()
                .map(|(name, type_line, text)| CardFace {
                    name: (*name).into(),
                    type_line: Some((*type_line).into()),
                    oracle_text: Some((*text).into()),
                    ..CardFace::default()
                })
                .collect(),
        );
        self
    }

    pub fn build(self) -> CardRecord {
        self.0
    }
}

/// A small catalog covering every filter rule.
#[allow(dead_code)]
pub fn sample_catalog() -> Vec<CardRecord> {
    use Color::*;
    vec![
        CardBuilder::new("Sol Ring")
            .type_line("Artifact")
            .text("{T}: Add {C}{C}.")
            .cmc(1.0)
            .build(),
        CardBuilder::new("Solemn Simulacrum")
            .type_line("Artifact Creature — Golem")
            .text("When Solemn Simulacrum enters, you may search your library for a basic land card. When it dies, you may draw a card.")
            .cmc(4.0)
            .build(),
        CardBuilder::new("Llanowar Elves")
            .type_line("Creature — Elf Druid")
            .text("{T}: Add {G}.")
            .cmc(1.0)
            .identity(&[Green])
            .build(),
        CardBuilder::new("Counterspell")
            .type_line("Instant")
            .text("Counter target spell.")
            .cmc(2.0)
            .identity(&[Blue])
            .build(),
        CardBuilder::new("Lightning Bolt")
            .type_line("Instant")
            .text("Lightning Bolt deals 3 damage to any target.")
            .cmc(1.0)
            .identity(&[Red])
            .build(),
        CardBuilder::new("Growth Spiral")
            .type_line("Instant")
            .text("Draw a card. You may put a land card from your hand onto the battlefield.")
            .cmc(2.0)
            .identity(&[Green, Blue])
            .build(),
        CardBuilder::new("Delver of Secrets // Insectile Aberration")
            .faces(&[
                ("Delver of Secrets", "Creature — Human Wizard", "Look at the top card of your library."),
                ("Insectile Aberration", "Creature — Human Insect", "Flying"),
            ])
            .cmc(1.0)
            .identity(&[Blue])
            .build(),
        CardBuilder::new("Goblin Token")
            .type_line("Token Creature — Goblin")
            .cmc(0.0)
            .identity(&[Red])
            .build(),
        CardBuilder::new("The One Ring")
            .type_line("Legendary Artifact")
            .text("Indestructible. When The One Ring enters, if you cast it, you gain protection from everything until your next turn. {T}: Put a burden counter on The One Ring, then draw a card for each burden counter on The One Ring.")
            .cmc(4.0)
            .set("ltr")
            .build(),
        CardBuilder::new("The Fourteenth Doctor")
            .type_line("Legendary Creature — Time Lord Doctor")
            .text("You may cast spells as though they had flash.")
            .cmc(4.0)
            .identity(&[White, Blue, Red])
            .set("who")
            .build(),
        CardBuilder::new("Mystery Crossover")
            .type_line("Creature — Alien")
            .text("Draw a card.")
            .cmc(3.0)
            .set("zzz")
            .triangle_stamp()
            .build(),
        CardBuilder::new("Alchemy Card")
            .type_line("Creature — Spirit")
            .cmc(2.0)
            .digital_only()
            .build(),
        CardBuilder::new("Silver Squirrel")
            .type_line("Creature — Squirrel")
            .cmc(1.0)
            .border("silver")
            .set_type("funny")
            .build(),
        CardBuilder::new("Big Card")
            .type_line("Plane — Dominaria")
            .oversized()
            .build(),
        CardBuilder::new("Playtest Thing")
            .type_line("Creature — Test")
            .cmc(3.0)
            .playtest()
            .build(),
    ]
}
