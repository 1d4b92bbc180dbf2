mod test_support;

use serde_json::json;
use test_support::{
    request_err, request_ok, seed_fixture, spawn_sidecar, str_array, temp_dir, with_identity,
};

fn sorted_choices(order: &serde_json::Value) -> Vec<String> {
    let mut ids = str_array(order, "choiceIds");
    ids.sort();
    ids
}

#[test]
fn select_replicate_and_save_round_trip() {
    let workspace = temp_dir("lunchd-session-replicate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "orders.session.open",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "start": "2024-03-04", "end": "2024-03-08" }),
        ),
    );
    assert_eq!(opened.get("state"), Some(&json!("clean")));
    assert_eq!(str_array(&opened, "orderable").len(), 5);

    let nothing = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orders.session.replicate",
        json!({ "date": "2024-03-06", "mode": "sameWeekday", "n": 3 }),
    );
    assert_eq!(nothing.get("nothingToCopy"), Some(&json!(true)));
    assert_eq!(nothing.get("state"), Some(&json!("clean")));

    let picked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "orders.session.select",
        json!({ "date": "2024-03-06", "groupId": fx.sandwich_group, "choiceId": fx.ham }),
    );
    assert_eq!(picked.get("state"), Some(&json!("dirty")));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "orders.session.select",
        json!({ "date": "2024-03-06", "groupId": fx.snack_group, "choiceId": fx.apple }),
    );
    // One sandwich allowed: picking cheese replaces ham.
    let swapped = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "orders.session.select",
        json!({ "date": "2024-03-06", "groupId": fx.sandwich_group, "choiceId": fx.cheese }),
    );
    assert_eq!(
        swapped.pointer(&format!("/selections/{}", fx.sandwich_group)),
        Some(&json!([fx.cheese]))
    );

    // Wednesday 13th is a holiday, so three weeks copy onto two days.
    let weekly = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "orders.session.replicate",
        json!({ "date": "2024-03-06", "mode": "sameWeekday", "n": 3 }),
    );
    assert_eq!(weekly.get("copied"), Some(&json!(2)));
    assert_eq!(
        str_array(&weekly, "copiedDates"),
        vec!["2024-03-20", "2024-03-27"]
    );

    let next = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "orders.session.replicate",
        json!({ "date": "2024-03-06", "mode": "nextDays", "n": 2 }),
    );
    assert_eq!(
        str_array(&next, "copiedDates"),
        vec!["2024-03-07", "2024-03-08"]
    );

    let saved = request_ok(&mut stdin, &mut reader, "8", "orders.session.save", json!({}));
    assert_eq!(saved.get("saved"), Some(&json!(5)));
    assert_eq!(saved.get("state"), Some(&json!("clean")));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "orders.list",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "start": "2024-03-01", "end": "2024-03-31" }),
        ),
    );
    let orders = listed.get("orders").and_then(|v| v.as_array()).expect("orders");
    let dates: Vec<&str> = orders
        .iter()
        .map(|o| o.get("date").and_then(|v| v.as_str()).expect("date"))
        .collect();
    assert_eq!(
        dates,
        vec!["2024-03-06", "2024-03-07", "2024-03-08", "2024-03-20", "2024-03-27"]
    );
    let mut expected = vec![fx.apple.clone(), fx.cheese.clone()];
    expected.sort();
    for order in orders {
        assert_eq!(sorted_choices(order), expected);
    }
}

#[test]
fn reopening_a_dirty_session_needs_confirmation() {
    let workspace = temp_dir("lunchd-session-dirty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);
    let open = json!({ "pupilId": fx.pupil_id, "start": "2024-03-04", "end": "2024-03-08" });

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "orders.session.open",
        with_identity(&fx.parent, open.clone()),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orders.session.select",
        json!({ "date": "2024-03-05", "groupId": fx.sandwich_group, "choiceId": fx.ham }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "orders.session.open",
        with_identity(&fx.parent, open.clone()),
    );
    assert_eq!(code, "unsaved_changes");

    let mut confirmed = open.clone();
    confirmed["confirmDiscard"] = json!(true);
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "orders.session.open",
        with_identity(&fx.parent, confirmed),
    );
    assert_eq!(reopened.get("state"), Some(&json!("clean")));
    assert_eq!(reopened.get("selections"), Some(&json!({})));

    let discarded = request_ok(&mut stdin, &mut reader, "5", "orders.session.discard", json!({}));
    assert_eq!(discarded.get("discarded"), Some(&json!(true)));
    let code = request_err(&mut stdin, &mut reader, "6", "orders.session.get", json!({}));
    assert_eq!(code, "no_session");
}

#[test]
fn dirty_session_survives_unconfirmed_discard_and_workspace_switch() {
    let workspace = temp_dir("lunchd-session-guard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);
    let path = workspace.to_string_lossy().to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "orders.session.open",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "start": "2024-03-04", "end": "2024-03-08" }),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orders.session.select",
        json!({ "date": "2024-03-05", "groupId": fx.sandwich_group, "choiceId": fx.ham }),
    );

    let code = request_err(&mut stdin, &mut reader, "3", "workspace.select", json!({ "path": path }));
    assert_eq!(code, "unsaved_changes");
    let code = request_err(&mut stdin, &mut reader, "4", "orders.session.discard", json!({}));
    assert_eq!(code, "unsaved_changes");

    let kept = request_ok(&mut stdin, &mut reader, "5", "orders.session.get", json!({}));
    assert_eq!(kept.get("state"), Some(&json!("dirty")));
    assert_eq!(
        kept.pointer(&format!("/selections/2024-03-05/{}", fx.sandwich_group)),
        Some(&json!([fx.ham]))
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": path, "confirmDiscard": true }),
    );
    let code = request_err(&mut stdin, &mut reader, "7", "orders.session.get", json!({}));
    assert_eq!(code, "no_session");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "orders.session.open",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "start": "2024-03-04", "end": "2024-03-08" }),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "orders.session.select",
        json!({ "date": "2024-03-05", "groupId": fx.sandwich_group, "choiceId": fx.ham }),
    );
    let discarded = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "orders.session.discard",
        json!({ "confirmDiscard": true }),
    );
    assert_eq!(discarded.get("discarded"), Some(&json!(true)));
}

#[test]
fn selecting_closed_days_is_refused() {
    let workspace = temp_dir("lunchd-session-closed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "orders.session.open",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "start": "2024-03-01", "end": "2024-03-15" }),
        ),
    );
    for (i, date) in ["2024-03-01", "2024-03-09", "2024-03-13"].iter().enumerate() {
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "orders.session.select",
            json!({ "date": date, "groupId": fx.sandwich_group, "choiceId": fx.ham }),
        );
        assert_eq!(code, "not_orderable", "{}", date);
    }
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "orders.session.select",
        json!({ "date": "2024-03-05", "groupId": fx.snack_group, "choiceId": fx.ham }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "orders.session.replicate",
        json!({ "date": "2024-03-05", "mode": "sideways" }),
    );
    assert_eq!(code, "bad_params");

    let session = request_ok(&mut stdin, &mut reader, "4", "orders.session.get", json!({}));
    assert_eq!(session.get("state"), Some(&json!("clean")));
}
