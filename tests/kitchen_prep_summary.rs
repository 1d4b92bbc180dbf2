mod test_support;

use serde_json::json;
use test_support::{
    admin, parent, request_err, request_ok, school_admin, seed_fixture, spawn_sidecar, str_array,
    str_field, temp_dir, with_identity,
};

#[test]
fn prep_summary_counts_choices_by_scope_and_setting() {
    let workspace = temp_dir("lunchd-kitchen-prep");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);
    let admin = admin();

    // Second classroom with its own claimed pupil.
    let room = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classrooms.create",
        with_identity(&admin, json!({ "schoolId": fx.school_id, "name": "2B" })),
    );
    let room_id = str_field(&room, "classroomId");
    let codes = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classrooms.addUnregisteredPupils",
        with_identity(&admin, json!({ "classroomId": room_id, "count": 1 })),
    );
    let other_pupil = str_array(&codes, "codes").remove(0);
    let dad = parent("parent-9");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "pupils.claim",
        with_identity(&dad, json!({ "codes": [other_pupil] })),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "orders.save",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "orders": [
                { "date": "2024-03-05", "choiceIds": [fx.ham, fx.apple, fx.yogurt] }
            ]}),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "orders.save",
        with_identity(
            &dad,
            json!({ "pupilId": other_pupil, "orders": [
                { "date": "2024-03-05", "choiceIds": [fx.cheese, fx.apple] }
            ]}),
        ),
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "kitchen.prepSummary",
        with_identity(&admin, json!({ "date": "2024-03-05" })),
    );
    assert_eq!(
        all.get("rows"),
        Some(&json!([
            { "group": "Sandwich", "choice": "Cheese", "count": 1 },
            { "group": "Sandwich", "choice": "Ham", "count": 1 },
            { "group": "Snack", "choice": "Apple", "count": 2 },
            { "group": "Snack", "choice": "Yogurt", "count": 1 }
        ]))
    );
    assert_eq!(
        all.get("groups"),
        Some(&json!([
            { "group": "Sandwich", "total": 2 },
            { "group": "Snack", "total": 3 }
        ]))
    );

    let one_room = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "kitchen.prepSummary",
        with_identity(&admin, json!({ "date": "2024-03-05", "classroomId": room_id })),
    );
    assert_eq!(one_room.get("rows").and_then(|v| v.as_array()).map(|r| r.len()), Some(2));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        with_identity(
            &admin,
            json!({ "section": "kitchen", "patch": { "sortBy": "count", "includeEmptyGroups": true } }),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "meals.groups.create",
        with_identity(&admin, json!({ "name": "Drinks", "maxSelections": 1 })),
    );
    let sorted = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "kitchen.prepSummary",
        with_identity(&admin, json!({ "date": "2024-03-05" })),
    );
    assert_eq!(sorted.pointer("/rows/0/choice"), Some(&json!("Apple")));
    assert_eq!(sorted.pointer("/groups/0"), Some(&json!({ "group": "Drinks", "total": 0 })));

    let empty_day = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "kitchen.prepSummary",
        with_identity(&admin, json!({ "date": "2024-03-06" })),
    );
    assert_eq!(empty_day.get("rows"), Some(&json!([])));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "kitchen.prepSummary",
        with_identity(&fx.parent, json!({ "date": "2024-03-05" })),
    );
    assert_eq!(code, "unauthorized");
}

#[test]
fn school_admin_sees_only_their_own_school() {
    let workspace = temp_dir("lunchd-kitchen-school-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_fixture(&mut stdin, &mut reader, &workspace);
    let admin = admin();

    let south = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schools.create",
        with_identity(&admin, json!({ "name": "South Primary" })),
    );
    let south_id = str_field(&south, "schoolId");
    let south_room = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classrooms.create",
        with_identity(&admin, json!({ "schoolId": south_id, "name": "3C" })),
    );
    let south_room_id = str_field(&south_room, "classroomId");
    let codes = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classrooms.addUnregisteredPupils",
        with_identity(&admin, json!({ "classroomId": south_room_id, "count": 1 })),
    );
    let south_pupil = str_array(&codes, "codes").remove(0);
    let mum = parent("parent-5");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "pupils.claim",
        with_identity(&mum, json!({ "codes": [south_pupil] })),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4b",
        "schedules.create",
        with_identity(
            &admin,
            json!({ "schoolId": south_id, "name": "Spring", "kind": "TERM", "startDate": "2024-03-01", "endDate": "2024-03-29" }),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "orders.save",
        with_identity(
            &fx.parent,
            json!({ "pupilId": fx.pupil_id, "orders": [{ "date": "2024-03-05", "choiceIds": [fx.ham] }] }),
        ),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "orders.save",
        with_identity(
            &mum,
            json!({ "pupilId": south_pupil, "orders": [{ "date": "2024-03-05", "choiceIds": [fx.cheese] }] }),
        ),
    );

    // No schoolId: locked to the caller's school.
    let north_staff = school_admin(&fx.school_id);
    let own = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "kitchen.prepSummary",
        with_identity(&north_staff, json!({ "date": "2024-03-05" })),
    );
    assert_eq!(
        own.get("rows"),
        Some(&json!([{ "group": "Sandwich", "choice": "Ham", "count": 1 }]))
    );

    let own_room = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "kitchen.prepSummary",
        with_identity(&north_staff, json!({ "date": "2024-03-05", "classroomId": fx.classroom_id })),
    );
    assert_eq!(own_room.get("rows"), own.get("rows"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "kitchen.prepSummary",
        with_identity(&north_staff, json!({ "date": "2024-03-05", "schoolId": south_id })),
    );
    assert_eq!(code, "forbidden");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "kitchen.prepSummary",
        with_identity(&north_staff, json!({ "date": "2024-03-05", "classroomId": south_room_id })),
    );
    assert_eq!(code, "forbidden");

    let south_view = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "kitchen.prepSummary",
        with_identity(&school_admin(&south_id), json!({ "date": "2024-03-05" })),
    );
    assert_eq!(south_view.pointer("/rows/0/choice"), Some(&json!("Cheese")));
}
