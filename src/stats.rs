use std::collections::HashSet;

/// Derived counter triple for one student.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Counters {
    pub total_classes: i64,
    pub present_classes: i64,
    pub attendance_percentage: f64,
}

pub fn attendance_percentage(total_classes: i64, present_classes: i64) -> f64 {
    if total_classes == 0 {
        0.0
    } else {
        100.0 * (present_classes as f64) / (total_classes as f64)
    }
}

/// Counters after a new day is marked: the day always counts toward the
/// total; presence decides whether it also counts toward present.
pub fn counters_after_mark(total: i64, present: i64, is_present: bool) -> Counters {
    let new_total = total + 1;
    let new_present = present + if is_present { 1 } else { 0 };
    Counters {
        total_classes: new_total,
        present_classes: new_present,
        attendance_percentage: attendance_percentage(new_total, new_present),
    }
}

/// Counters after an edit to an already-marked day. The total never moves;
/// only a present<->absent flip adjusts the present count, clamped into
/// 0..=total. A flip that would leave that range belongs to a student who
/// was not counted when the day was marked (inactive then, listed anyway),
/// so their cache is left alone. Returns None when no write is needed.
pub fn counters_after_update(
    total: i64,
    present: i64,
    was_present: bool,
    is_present: bool,
) -> Option<Counters> {
    if was_present == is_present {
        return None;
    }
    let new_present = if is_present {
        (present + 1).min(total)
    } else {
        (present - 1).max(0)
    };
    if new_present == present {
        return None;
    }
    Some(Counters {
        total_classes: total,
        present_classes: new_present,
        attendance_percentage: attendance_percentage(total, new_present),
    })
}

/// Full recomputation from the attendance log, for audit/recovery. Each
/// history entry is one day's present-set; the student's total is the number
/// of recorded days, present the number of sets containing them.
pub fn counters_from_history<'a, I>(student_id: &str, history: I) -> Counters
where
    I: IntoIterator<Item = &'a HashSet<String>>,
{
    let mut total: i64 = 0;
    let mut present: i64 = 0;
    for day in history {
        total += 1;
        if day.contains(student_id) {
            present += 1;
        }
    }
    Counters {
        total_classes: total,
        present_classes: present,
        attendance_percentage: attendance_percentage(total, present),
    }
}

/// One-decimal rounding for presentation (profile views show 87.5, not
/// 87.5342...). Storage keeps full precision.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
