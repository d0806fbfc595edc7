use persona_core::{CharacterTrait, NewCharacter, Relationship};
use tracing::info;

use crate::characters::CharacterRepo;
use crate::error::StoreError;

/// Insert the demo cast when the character table is empty.
/// Returns how many characters were inserted.
pub fn seed_demo_characters(repo: &CharacterRepo) -> Result<usize, StoreError> {
    if repo.count()? > 0 {
        return Ok(0);
    }
    let cast = demo_cast();
    for character in &cast {
        repo.create(character, None)?;
    }
    info!(count = cast.len(), "seeded demo characters");
    Ok(cast.len())
}

fn demo_cast() -> Vec<NewCharacter> {
    let mut julian = NewCharacter::new("Julian Carter", "Protagonist");
    julian.appearance = Some(
        "A brooding young scholar haunted by his tragic past, driven to uncover the truth at any cost.".into(),
    );
    julian.description = Some("A brooding young scholar haunted by his tragic past".into());
    julian.category = "Protagonists".into();
    julian.progress = 40;
    julian.image_url = Some(unsplash("photo-1506794778202-cad84cf45f1d"));
    julian.traits = vec![
        rated(
            "Determination",
            4,
            "Julian's determination borders on obsession; he will pursue knowledge at almost any cost.",
        ),
        rated(
            "Caution",
            2,
            "While normally cautious, Julian's determination can override this trait when pursuing important leads.",
        ),
    ];
    julian.motivations = Some(
        "Julian is primarily motivated by a desire to uncover the truth about his family's mysterious past. \
         The loss of his parents in what appeared to be an accident has driven him to pursue answers, \
         believing there were darker forces at play. He struggles with guilt that he wasn't there to prevent their deaths."
            .into(),
    );
    julian.conflicts = Some(
        "Julian struggles with his growing obsession and the moral compromises he's willing to make to uncover \
         the truth. He worries he's becoming like those he's investigating. He also wrestles with survivor's guilt \
         and questions whether his academic pursuits are merely a distraction from processing grief."
            .into(),
    );

    let mut elara = NewCharacter::new("Elara Nightshade", "Antagonist");
    elara.appearance =
        Some("A poised, elegant woman with piercing eyes and an enigmatic smile that never reaches her eyes.".into());
    elara.description = Some("The enigmatic leader of a secret organization with mysterious goals".into());
    elara.category = "Antagonists".into();
    elara.progress = 65;
    elara.image_url = Some(unsplash("photo-1580489944761-15a19d654956"));
    elara.traits = vec![
        rated(
            "Intelligence",
            5,
            "Elara possesses a brilliant, analytical mind that can see ten steps ahead of her opponents.",
        ),
        rated(
            "Ruthlessness",
            4,
            "She will eliminate obstacles to her plans without hesitation, though she takes no pleasure in pointless cruelty.",
        ),
    ];

    let mut marcus = NewCharacter::new("Marcus Wells", "Supporting Character");
    marcus.appearance = Some(
        "A weathered professor with kind eyes behind wire-rimmed glasses, always dressed in rumpled tweed.".into(),
    );
    marcus.description = Some("Julian's mentor and father figure who harbors his own secrets".into());
    marcus.category = "Supporting Characters".into();
    marcus.progress = 30;
    marcus.image_url = Some(unsplash("photo-1500648767791-00dcc994a43e"));
    marcus.relationships = vec![Relationship {
        name: "Julian Carter".into(),
        relation: "Student/Mentee".into(),
        description: Some(
            "Sees Julian as the son he never had, but worries about his growing obsession.".into(),
        ),
        strength: Some(4),
    }];

    vec![julian, elara, marcus]
}

fn rated(name: &str, value: i64, description: &str) -> CharacterTrait {
    CharacterTrait {
        name: name.into(),
        value,
        description: Some(description.into()),
    }
}

fn unsplash(photo: &str) -> String {
    format!("https://images.unsplash.com/{photo}?ixlib=rb-1.2.1&auto=format&fit=crop&w=600&q=60")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn seeds_once() {
        let repo = CharacterRepo::new(Database::in_memory().unwrap());
        assert_eq!(seed_demo_characters(&repo).unwrap(), 3);
        assert_eq!(seed_demo_characters(&repo).unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn demo_cast_is_valid() {
        for character in demo_cast() {
            character.validate().unwrap();
        }
    }

    #[test]
    fn seeded_characters_keep_order_and_content() {
        let repo = CharacterRepo::new(Database::in_memory().unwrap());
        seed_demo_characters(&repo).unwrap();
        let all = repo.list().unwrap();
        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Julian Carter", "Elara Nightshade", "Marcus Wells"]);
        assert_eq!(all[0].traits[0].name, "Determination");
        assert_eq!(all[2].relationships[0].strength, Some(4));
        assert_eq!(all[1].folder, "My Novel");
    }

    #[test]
    fn skips_non_empty_table() {
        let repo = CharacterRepo::new(Database::in_memory().unwrap());
        repo.create(&NewCharacter::new("Existing", "Extra"), None).unwrap();
        assert_eq!(seed_demo_characters(&repo).unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
