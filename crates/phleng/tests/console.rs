mod common;

use common::*;
use llmchat::Message;
use phleng::console::run_chat;
use phlengconf::PhlengConfig;

#[tokio::test]
async fn chat_prints_notation_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Message::assistant(SONG),
        Message::assistant("Sorry, I cannot help with that."),
    ]);
    let studio = studio(PhlengConfig::default(), model.clone(), dir.path().into(), false);

    let input = std::io::Cursor::new(b"festive\nmake it rude\n\nnever read\n".to_vec());
    let mut output = Vec::new();
    run_chat(&studio, "gpt-5-mini", input, &mut output).await.unwrap();

    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains("```\nX: 1\nT: Ruen Roeng"));
    assert!(printed.contains("MIDI: "));
    assert!(printed.contains("error [missing_fence]"));
    assert_eq!(model.calls(), 2);
}
