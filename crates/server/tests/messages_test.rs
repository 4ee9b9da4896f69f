mod common;

use murmur_server::error::AppError;
use murmur_server::models::{
    DeliveryStatus, MediaDescriptor, MessageOrder, MessageType, NewMessage, Page,
};
use murmur_server::AppState;
use std::sync::Arc;

async fn setup() -> (Arc<AppState>, String, String, String) {
    let pool = common::setup_test_db().await;
    let state = common::create_test_state(pool);
    let (alice, _) = common::create_test_user(&state, "alice").await;
    let (bob, _) = common::create_test_user(&state, "bob").await;
    let convo = common::create_direct(&state, &alice, &bob).await;
    (state, alice, bob, convo.id)
}

fn text(conversation_id: &str, sender: &str, content: &str) -> NewMessage {
    NewMessage {
        conversation_id: conversation_id.into(),
        sender_id: sender.into(),
        content: content.into(),
        message_type: MessageType::Text,
        reply_to_id: None,
        media: None,
    }
}

fn page(limit: i64, offset: i64, order: MessageOrder) -> Page {
    Page {
        limit,
        offset,
        order,
    }
}

#[tokio::test]
async fn content_is_encrypted_at_rest_and_decrypted_for_readers() {
    let (state, alice, bob, convo) = setup().await;

    let sent = state.messages().create(text(&convo, &alice, "hi")).await.unwrap();
    assert_eq!(sent.content.as_deref(), Some("hi"));
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert!(!sent.is_edited);

    let stored = sqlx::query_scalar::<_, String>("SELECT content FROM messages WHERE id = ?")
        .bind(&sent.id)
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_ne!(stored, "hi");
    assert!(!stored.contains("hi"));

    let listed = state
        .messages()
        .list_for_conversation(&convo, &bob, Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content.as_deref(), Some("hi"));
    assert_eq!(listed[0].sender_id, alice);
}

#[tokio::test]
async fn sender_gets_initial_sent_status_row() {
    let (state, alice, _bob, convo) = setup().await;
    let sent = state.messages().create(text(&convo, &alice, "hi")).await.unwrap();

    let row = sqlx::query_scalar::<_, String>(
        "SELECT status FROM message_status WHERE message_id = ? AND user_id = ?",
    )
    .bind(&sent.id)
    .bind(&alice)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(row, "sent");
}

#[tokio::test]
async fn only_participants_may_send_or_read() {
    let (state, _alice, _bob, convo) = setup().await;
    let (eve, _) = common::create_test_user(&state, "eve").await;

    let send = state.messages().create(text(&convo, &eve, "let me in")).await;
    assert!(matches!(send, Err(AppError::NotFound)));

    let read = state
        .messages()
        .list_for_conversation(&convo, &eve, Page::default())
        .await;
    assert!(matches!(read, Err(AppError::NotFound)));
}

#[tokio::test]
async fn content_rules_follow_message_type() {
    let (state, alice, _bob, convo) = setup().await;
    let store = state.messages();

    let empty = store.create(text(&convo, &alice, "   ")).await;
    assert!(matches!(empty, Err(AppError::BadRequest(_))));

    let mut image = text(&convo, &alice, "");
    image.message_type = MessageType::Image;
    let no_media = store.create(image.clone()).await;
    assert!(matches!(no_media, Err(AppError::BadRequest(_))));

    image.media = Some(MediaDescriptor {
        url: "https://cdn.example/cat.png".into(),
        thumbnail_url: Some("https://cdn.example/cat_t.png".into()),
        size: Some(2048),
        duration: None,
    });
    let ok = store.create(image).await.unwrap();
    assert_eq!(ok.message_type, MessageType::Image);
    assert_eq!(ok.media.as_ref().unwrap().size, Some(2048));

    let listed = store
        .list_for_conversation(&convo, &alice, Page::default())
        .await
        .unwrap();
    assert_eq!(
        listed[0].media.as_ref().unwrap().thumbnail_url.as_deref(),
        Some("https://cdn.example/cat_t.png")
    );
}

#[tokio::test]
async fn replies_must_stay_in_the_conversation() {
    let (state, alice, bob, convo) = setup().await;
    let (carol, _) = common::create_test_user(&state, "carol").await;
    let other = common::create_direct(&state, &alice, &carol).await;
    let store = state.messages();

    let original = store.create(text(&convo, &bob, "question?")).await.unwrap();
    let elsewhere = store.create(text(&other.id, &carol, "unrelated")).await.unwrap();

    let mut reply = text(&convo, &alice, "answer");
    reply.reply_to_id = Some(original.id.clone());
    let reply = store.create(reply).await.unwrap();
    assert_eq!(reply.reply_to_id.as_deref(), Some(original.id.as_str()));

    let mut stray = text(&convo, &alice, "answer");
    stray.reply_to_id = Some(elsewhere.id);
    assert!(matches!(
        store.create(stray).await,
        Err(AppError::BadRequest(_))
    ));
}

#[tokio::test]
async fn only_sender_may_edit_and_edit_sets_flag() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "draft")).await.unwrap();

    let by_bob = store.update(&sent.id, &bob, "hijack").await;
    assert!(matches!(by_bob, Err(AppError::NotFound)));

    let edited = store.update(&sent.id, &alice, "final").await.unwrap();
    assert_eq!(edited.content.as_deref(), Some("final"));
    assert!(edited.is_edited);
    assert!(edited.updated_at >= sent.updated_at);

    let missing = store.update("no-such-message", &alice, "x").await;
    assert!(matches!(missing, Err(AppError::NotFound)));
}

#[tokio::test]
async fn editing_a_deleted_message_is_not_found() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "regret")).await.unwrap();

    let by_bob = store.delete(&sent.id, &bob).await;
    assert!(matches!(by_bob, Err(AppError::NotFound)));

    let deleted = store.delete(&sent.id, &alice).await.unwrap();
    assert_eq!(deleted.conversation_id, convo);

    let edit = store.update(&sent.id, &alice, "undo").await;
    assert!(matches!(edit, Err(AppError::NotFound)));

    let twice = store.delete(&sent.id, &alice).await;
    assert!(matches!(twice, Err(AppError::NotFound)));
}

#[tokio::test]
async fn deleted_messages_are_listed_without_content() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "secret")).await.unwrap();
    store.delete(&sent.id, &alice).await.unwrap();

    let listed = store
        .list_for_conversation(&convo, &bob, Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_deleted);
    assert!(listed[0].content.is_none());

    // Ciphertext is kept
    let stored = sqlx::query_scalar::<_, String>("SELECT content FROM messages WHERE id = ?")
        .bind(&sent.id)
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert!(!stored.is_empty());
}

#[tokio::test]
async fn paging_and_ordering() {
    let (state, alice, _bob, convo) = setup().await;
    let store = state.messages();
    for i in 0..5 {
        store
            .create(text(&convo, &alice, &format!("m{i}")))
            .await
            .unwrap();
    }

    let newest = store
        .list_for_conversation(&convo, &alice, page(2, 0, MessageOrder::NewestFirst))
        .await
        .unwrap();
    let contents: Vec<_> = newest.iter().map(|m| m.content.clone().unwrap()).collect();
    assert_eq!(contents, ["m4", "m3"]);

    let next = store
        .list_for_conversation(&convo, &alice, page(2, 2, MessageOrder::NewestFirst))
        .await
        .unwrap();
    let contents: Vec<_> = next.iter().map(|m| m.content.clone().unwrap()).collect();
    assert_eq!(contents, ["m2", "m1"]);

    let oldest = store
        .list_for_conversation(&convo, &alice, page(100, 0, MessageOrder::OldestFirst))
        .await
        .unwrap();
    let contents: Vec<_> = oldest.iter().map(|m| m.content.clone().unwrap()).collect();
    assert_eq!(contents, ["m0", "m1", "m2", "m3", "m4"]);

    // Limit is clamped, not rejected
    let clamped = store
        .list_for_conversation(&convo, &alice, page(0, 0, MessageOrder::NewestFirst))
        .await
        .unwrap();
    assert_eq!(clamped.len(), 1);

    let negative = store
        .list_for_conversation(&convo, &alice, page(10, -1, MessageOrder::NewestFirst))
        .await;
    assert!(matches!(negative, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn status_never_moves_backwards() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "hi")).await.unwrap();

    let delivered = store
        .update_status(&sent.id, &bob, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.status, DeliveryStatus::Delivered);

    let read = store
        .update_status(&sent.id, &bob, DeliveryStatus::Read)
        .await
        .unwrap();
    assert_eq!(read.status, DeliveryStatus::Read);

    let regress = store
        .update_status(&sent.id, &bob, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(regress.status, DeliveryStatus::Read);

    let view = store.get(&sent.id, &alice).await.unwrap();
    assert_eq!(view.status, DeliveryStatus::Read);
    assert_eq!(view.read_by, vec![bob.clone()]);
}

#[tokio::test]
async fn status_needs_a_visible_live_message() {
    let (state, alice, bob, convo) = setup().await;
    let (eve, _) = common::create_test_user(&state, "eve").await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "hi")).await.unwrap();

    let outsider = store
        .update_status(&sent.id, &eve, DeliveryStatus::Read)
        .await;
    assert!(matches!(outsider, Err(AppError::NotFound)));

    store.delete(&sent.id, &alice).await.unwrap();
    let on_deleted = store
        .update_status(&sent.id, &bob, DeliveryStatus::Read)
        .await;
    assert!(matches!(on_deleted, Err(AppError::NotFound)));
}

#[tokio::test]
async fn aggregate_status_waits_for_every_recipient() {
    let pool = common::setup_test_db().await;
    let state = common::create_test_state(pool);
    let (alice, _) = common::create_test_user(&state, "alice").await;
    let (bob, _) = common::create_test_user(&state, "bob").await;
    let (carol, _) = common::create_test_user(&state, "carol").await;
    let group = common::create_group(&state, &alice, &[bob.as_str(), carol.as_str()]).await;
    let store = state.messages();

    let sent = store.create(text(&group.id, &alice, "all here?")).await.unwrap();

    store
        .update_status(&sent.id, &bob, DeliveryStatus::Read)
        .await
        .unwrap();
    assert_eq!(
        store.get(&sent.id, &alice).await.unwrap().status,
        DeliveryStatus::Sent
    );

    store
        .update_status(&sent.id, &carol, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(
        store.get(&sent.id, &alice).await.unwrap().status,
        DeliveryStatus::Delivered
    );

    state.conversations().mark_read(&group.id, &carol).await.unwrap();
    let view = store.get(&sent.id, &alice).await.unwrap();
    assert_eq!(view.status, DeliveryStatus::Read);
    assert_eq!(view.read_by.len(), 2);
}

#[tokio::test]
async fn batch_status_skips_invisible_ids() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let first = store.create(text(&convo, &alice, "one")).await.unwrap();
    let second = store.create(text(&convo, &alice, "two")).await.unwrap();

    let ids = vec![
        first.id.clone(),
        second.id.clone(),
        first.id.clone(),
        "no-such-message".to_string(),
    ];
    let applied = store
        .batch_update_status(&ids, &bob, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|c| c.status == DeliveryStatus::Delivered));

    let too_many: Vec<String> = (0..501).map(|i| format!("id-{i}")).collect();
    let rejected = store
        .batch_update_status(&too_many, &bob, DeliveryStatus::Read)
        .await;
    assert!(matches!(rejected, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn reactions_are_idempotent() {
    let (state, alice, bob, convo) = setup().await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "nice")).await.unwrap();

    assert!(store.add_reaction(&sent.id, &bob, "👍").await.unwrap());
    assert!(!store.add_reaction(&sent.id, &bob, "👍").await.unwrap());
    assert!(store.add_reaction(&sent.id, &bob, "🎉").await.unwrap());

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM message_reactions WHERE message_id = ? AND emoji = '👍'",
    )
    .bind(&sent.id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(count, 1);

    let view = store.get(&sent.id, &alice).await.unwrap();
    assert_eq!(view.reactions.len(), 2);

    assert!(store.remove_reaction(&sent.id, &bob, "👍").await.unwrap());
    assert!(!store.remove_reaction(&sent.id, &bob, "👍").await.unwrap());
    assert!(!store.remove_reaction(&sent.id, &alice, "🔥").await.unwrap());

    let view = store.get(&sent.id, &alice).await.unwrap();
    assert_eq!(view.reactions.len(), 1);
    assert_eq!(view.reactions[0].emoji, "🎉");
}

#[tokio::test]
async fn reactions_need_a_visible_live_message() {
    let (state, alice, _bob, convo) = setup().await;
    let (eve, _) = common::create_test_user(&state, "eve").await;
    let store = state.messages();
    let sent = store.create(text(&convo, &alice, "hi")).await.unwrap();

    let outsider = store.add_reaction(&sent.id, &eve, "👀").await;
    assert!(matches!(outsider, Err(AppError::NotFound)));

    let blank = store.add_reaction(&sent.id, &alice, "  ").await;
    assert!(matches!(blank, Err(AppError::BadRequest(_))));

    store.delete(&sent.id, &alice).await.unwrap();
    let on_deleted = store.add_reaction(&sent.id, &alice, "👀").await;
    assert!(matches!(on_deleted, Err(AppError::NotFound)));
}

#[tokio::test]
async fn content_survives_key_rotation_only_with_the_old_key() {
    let (state, alice, bob, convo) = setup().await;
    state.messages().create(text(&convo, &alice, "before")).await.unwrap();

    state.keys.rotate();

    let result = state
        .messages()
        .list_for_conversation(&convo, &bob, Page::default())
        .await;
    assert!(matches!(result, Err(AppError::DecryptionFailed)));
}
