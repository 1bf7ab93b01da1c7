use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::outline::StoryOutline;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    name: String,
    description: String,
}

#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("character name must not be empty")]
    EmptyName,
    #[error("character description must not be empty")]
    EmptyDescription,
}

impl Character {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, CharacterError> {
        let name = name.into().trim().to_string();
        let description = description.into().trim().to_string();
        if name.is_empty() {
            return Err(CharacterError::EmptyName);
        }
        if description.is_empty() {
            return Err(CharacterError::EmptyDescription);
        }
        Ok(Self { name, description })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Genre {
    ScienceFiction,
    Fantasy,
    Mystery,
    Romance,
    Horror,
    Thriller,
    HistoricalFiction,
    Comedy,
}

impl Genre {
    pub const ALL: &'static [Genre] = &[
        Genre::ScienceFiction,
        Genre::Fantasy,
        Genre::Mystery,
        Genre::Romance,
        Genre::Horror,
        Genre::Thriller,
        Genre::HistoricalFiction,
        Genre::Comedy,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Genre::ScienceFiction => "Science Fiction",
            Genre::Fantasy => "Fantasy",
            Genre::Mystery => "Mystery",
            Genre::Romance => "Romance",
            Genre::Horror => "Horror",
            Genre::Thriller => "Thriller",
            Genre::HistoricalFiction => "Historical Fiction",
            Genre::Comedy => "Comedy",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        Genre::ALL
            .iter()
            .find(|genre| genre.label().to_lowercase() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown genre: `{input}`"))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WritingStyle {
    Descriptive,
    Narrative,
    Humorous,
    Poetic,
    Minimalist,
}

impl WritingStyle {
    pub const ALL: &'static [WritingStyle] = &[
        WritingStyle::Descriptive,
        WritingStyle::Narrative,
        WritingStyle::Humorous,
        WritingStyle::Poetic,
        WritingStyle::Minimalist,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            WritingStyle::Descriptive => "Descriptive",
            WritingStyle::Narrative => "Narrative",
            WritingStyle::Humorous => "Humorous",
            WritingStyle::Poetic => "Poetic",
            WritingStyle::Minimalist => "Minimalist",
        }
    }
}

impl fmt::Display for WritingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WritingStyle {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        WritingStyle::ALL
            .iter()
            .find(|style| style.label().to_lowercase() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown writing style: `{input}`"))
    }
}

#[derive(Debug, Error)]
pub enum StoryError {
    /// Appending to a chapter the outline never declared. The outline and
    /// the content map are built together, so hitting this means the
    /// orchestrator and outline disagree about the chapter space.
    #[error("chapter {number} is not part of the story outline")]
    UnknownChapter { number: u32 },
}

/// Accumulator for one run: the outline, characters and setting fixed at
/// construction, plus per-chapter prose that grows append-only while the
/// chapter streams arrive.
#[derive(Clone, Debug)]
pub struct Story {
    outline: StoryOutline,
    characters: Vec<Character>,
    setting: String,
    chapter_content: BTreeMap<u32, String>,
}

impl Story {
    pub fn new(outline: StoryOutline, characters: Vec<Character>, setting: impl Into<String>) -> Self {
        let chapter_content = outline
            .chapter_numbers()
            .map(|number| (number, String::new()))
            .collect();
        Self {
            outline,
            characters,
            setting: setting.into(),
            chapter_content,
        }
    }

    pub fn outline(&self) -> &StoryOutline {
        &self.outline
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn setting(&self) -> &str {
        &self.setting
    }

    pub fn chapter_content(&self, number: u32) -> Option<&str> {
        self.chapter_content.get(&number).map(|s| s.as_str())
    }

    pub fn chapter_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.chapter_content.keys().copied()
    }

    /// Concatenates `fragment` onto the chapter's accumulated text.
    /// Content only grows; nothing is ever truncated or replaced.
    pub fn append_content(&mut self, number: u32, fragment: &str) -> Result<(), StoryError> {
        let content = self
            .chapter_content
            .get_mut(&number)
            .ok_or(StoryError::UnknownChapter { number })?;
        content.push_str(fragment);
        Ok(())
    }

    /// Full document: title heading, setting, character list, then every
    /// chapter in outline order. This is the single source of truth for
    /// the export formats.
    pub fn render_document(&self) -> String {
        let mut document = String::new();
        document.push_str(&format!("# {}\n\n", self.outline.title()));

        document.push_str("## Setting\n\n");
        document.push_str(self.setting.trim());
        document.push_str("\n\n");

        document.push_str("## Characters\n\n");
        for character in &self.characters {
            document.push_str(&format!(
                "- **{}**: {}\n",
                character.name(),
                character.description()
            ));
        }
        document.push('\n');

        for (number, _summary) in self.outline.chapters() {
            document.push_str(&format!("## Chapter {number}\n\n"));
            if let Some(content) = self.chapter_content.get(&number) {
                document.push_str(content.trim());
                document.push_str("\n\n");
            }
        }

        document.trim_end().to_string() + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn outline() -> StoryOutline {
        let chapters = BTreeMap::from([
            (1, "first".to_string()),
            (2, "second".to_string()),
            (3, "third".to_string()),
        ]);
        StoryOutline::new("My Tale", chapters)
    }

    fn story() -> Story {
        let characters = vec![Character::new("A", "d").unwrap()];
        Story::new(outline(), characters, "A quiet village")
    }

    #[test]
    fn construction_creates_empty_slots_without_title_key() {
        let story = story();
        let numbers: Vec<u32> = story.chapter_numbers().collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        for number in numbers {
            assert_eq!(story.chapter_content(number), Some(""));
        }
    }

    #[test]
    fn append_accumulates_in_order() {
        let mut story = story();
        story.append_content(1, "Once ").unwrap();
        story.append_content(1, "upon a time").unwrap();
        assert_eq!(story.chapter_content(1), Some("Once upon a time"));
        assert_eq!(story.chapter_content(2), Some(""));
        assert_eq!(story.chapter_content(3), Some(""));
    }

    #[test]
    fn append_to_unknown_chapter_fails_and_changes_nothing() {
        let mut story = story();
        story.append_content(1, "kept").unwrap();
        let error = story.append_content(9, "lost").expect_err("should fail");
        assert!(matches!(error, StoryError::UnknownChapter { number: 9 }));
        assert_eq!(story.chapter_content(1), Some("kept"));
        assert_eq!(story.chapter_content(9), None);
    }

    #[test]
    fn renders_document_sections_in_order() {
        let mut story = story();
        story.append_content(1, "Chapter one text.").unwrap();
        story.append_content(2, "Chapter two text.").unwrap();

        let document = story.render_document();
        assert!(document.starts_with("# My Tale\n"));
        assert!(document.contains("## Setting\n\nA quiet village"));
        assert!(document.contains("- **A**: d"));

        let one = document.find("Chapter one text.").unwrap();
        let two = document.find("Chapter two text.").unwrap();
        assert!(one < two);
    }

    #[test]
    fn character_fields_must_be_non_empty() {
        assert!(matches!(
            Character::new("", "healer"),
            Err(CharacterError::EmptyName)
        ));
        assert!(matches!(
            Character::new("Mira", "  "),
            Err(CharacterError::EmptyDescription)
        ));
    }

    #[test]
    fn genre_and_style_round_trip_labels() {
        assert_eq!(
            "historical fiction".parse::<Genre>().unwrap(),
            Genre::HistoricalFiction
        );
        assert_eq!(Genre::ScienceFiction.to_string(), "Science Fiction");
        assert_eq!(
            "poetic".parse::<WritingStyle>().unwrap(),
            WritingStyle::Poetic
        );
        assert!("brooding".parse::<WritingStyle>().is_err());
    }
}
