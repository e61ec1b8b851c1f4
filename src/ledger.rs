use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-up currency rounding: `floor(100x + 0.5) / 100`.
/// Applied to division-derived figures only; sums of caller-supplied
/// amounts are stored as computed.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("total working days must be greater than zero")]
    ZeroWorkingDays,
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error("batch not applied, safe to retry in full: {0}")]
    PartialFailure(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Stable wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ZeroWorkingDays => "division_by_zero",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PartialFailure(_) => "partial_failure",
            Self::Storage(_) => "db_failed",
        }
    }
}

fn check_money(field: &'static str, value: f64) -> Result<(), LedgerError> {
    if !value.is_finite() {
        return Err(LedgerError::invalid(format!("{} must be a finite number", field)));
    }
    if value < 0.0 {
        return Err(LedgerError::invalid(format!("{} must not be negative", field)));
    }
    Ok(())
}

fn check_count(field: &'static str, value: i64) -> Result<(), LedgerError> {
    if value < 0 {
        return Err(LedgerError::invalid(format!("{} must not be negative", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeType {
    Tuition,
    Admission,
    Exam,
    Transport,
    Library,
    Sports,
    Laboratory,
    Annual,
    Other,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tuition => "tuition",
            Self::Admission => "admission",
            Self::Exam => "exam",
            Self::Transport => "transport",
            Self::Library => "library",
            Self::Sports => "sports",
            Self::Laboratory => "laboratory",
            Self::Annual => "annual",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tuition" => Ok(Self::Tuition),
            "admission" => Ok(Self::Admission),
            "exam" => Ok(Self::Exam),
            "transport" => Ok(Self::Transport),
            "library" => Ok(Self::Library),
            "sports" => Ok(Self::Sports),
            "laboratory" => Ok(Self::Laboratory),
            "annual" => Ok(Self::Annual),
            "other" => Ok(Self::Other),
            other => Err(LedgerError::invalid(format!("unknown fee type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl FeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeeInputs {
    pub total_amount: f64,
    pub discount: f64,
    pub late_fee: f64,
    pub amount_paid: f64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSummary {
    pub amount_paid: f64,
    pub amount_pending: f64,
    pub status: FeeStatus,
}

/// Fee status classification. Branch order is load-bearing: a record with
/// any payment reports `partial` even when past its due date.
fn fee_status(amount_pending: f64, amount_paid: f64, due_date: NaiveDate, today: NaiveDate) -> FeeStatus {
    if amount_pending <= 0.0 {
        FeeStatus::Paid
    } else if amount_paid > 0.0 {
        FeeStatus::Partial
    } else if today > due_date {
        FeeStatus::Overdue
    } else {
        FeeStatus::Pending
    }
}

/// `amount_pending = total − paid + late_fee − discount`, stored unclamped;
/// only status classification treats ≤ 0 as settled.
pub fn derive_fee(inputs: &FeeInputs, today: NaiveDate) -> Result<FeeSummary, LedgerError> {
    check_money("total amount", inputs.total_amount)?;
    check_money("discount", inputs.discount)?;
    check_money("late fee", inputs.late_fee)?;
    check_money("amount paid", inputs.amount_paid)?;

    let amount_pending =
        inputs.total_amount - inputs.amount_paid + inputs.late_fee - inputs.discount;

    Ok(FeeSummary {
        amount_paid: inputs.amount_paid,
        amount_pending,
        status: fee_status(amount_pending, inputs.amount_paid, inputs.due_date, today),
    })
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Allowances {
    pub house_rent: f64,
    pub transport: f64,
    pub medical: f64,
    pub other: f64,
}

impl Allowances {
    pub fn total(&self) -> f64 {
        self.house_rent + self.transport + self.medical + self.other
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deductions {
    pub tax: f64,
    pub provident_fund: f64,
    pub professional_tax: f64,
    pub other: f64,
}

impl Deductions {
    pub fn total(&self) -> f64 {
        self.tax + self.provident_fund + self.professional_tax + self.other
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTally {
    pub total_working_days: i64,
    pub present_days: i64,
    pub absent_days: i64,
    pub leave_days: i64,
    pub half_days: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SalaryInputs {
    pub basic_salary: f64,
    pub allowances: Allowances,
    pub deductions: Deductions,
    pub tally: AttendanceTally,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalarySummary {
    pub attendance_deduction: f64,
    pub gross_salary: f64,
    pub net_salary: f64,
}

/// `gross = basic + Σ allowances`;
/// `attendance_deduction = (basic / working_days) × (absent + 0.5 × half)`;
/// `net = gross − Σ deductions − attendance_deduction`.
/// Fails closed on zero working days rather than producing NaN pay.
pub fn derive_salary(inputs: &SalaryInputs) -> Result<SalarySummary, LedgerError> {
    check_money("basic salary", inputs.basic_salary)?;
    check_money("house rent allowance", inputs.allowances.house_rent)?;
    check_money("transport allowance", inputs.allowances.transport)?;
    check_money("medical allowance", inputs.allowances.medical)?;
    check_money("other allowance", inputs.allowances.other)?;
    check_money("tax deduction", inputs.deductions.tax)?;
    check_money("provident fund deduction", inputs.deductions.provident_fund)?;
    check_money("professional tax deduction", inputs.deductions.professional_tax)?;
    check_money("other deduction", inputs.deductions.other)?;
    check_count("present days", inputs.tally.present_days)?;
    check_count("absent days", inputs.tally.absent_days)?;
    check_count("leave days", inputs.tally.leave_days)?;
    check_count("half days", inputs.tally.half_days)?;

    if inputs.tally.total_working_days <= 0 {
        return Err(LedgerError::ZeroWorkingDays);
    }

    let gross_salary = inputs.basic_salary + inputs.allowances.total();
    let per_day = inputs.basic_salary / inputs.tally.total_working_days as f64;
    let chargeable_days =
        inputs.tally.absent_days as f64 + 0.5 * inputs.tally.half_days as f64;
    let attendance_deduction = round2(per_day * chargeable_days);
    let net_salary = gross_salary - inputs.deductions.total() - attendance_deduction;

    Ok(SalarySummary {
        attendance_deduction,
        gross_salary,
        net_salary,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "paid" => Ok(Self::Paid),
            other => Err(LedgerError::invalid(format!(
                "unknown payment status: {}",
                other
            ))),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Paid => 2,
        }
    }

    /// Transitions run forward only: pending → processing → paid.
    pub fn can_advance_to(&self, next: PaymentStatus) -> bool {
        next.rank() == self.rank() + 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GradeInputs {
    pub total_marks: f64,
    pub marks_obtained: f64,
    pub passing_marks: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub percentage: f64,
    pub grade: &'static str,
    pub is_passed: bool,
}

/// Letter by threshold, first match wins.
pub fn letter_grade(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C+"
    } else if percentage >= 40.0 {
        "C"
    } else if percentage >= 33.0 {
        "D"
    } else if percentage >= 25.0 {
        "E"
    } else {
        "F"
    }
}

/// `is_passed` compares raw marks against the passing threshold and is
/// independent of the letter grade.
pub fn derive_grade(inputs: &GradeInputs) -> Result<GradeSummary, LedgerError> {
    if !inputs.total_marks.is_finite() || inputs.total_marks <= 0.0 {
        return Err(LedgerError::invalid("total marks must be greater than zero"));
    }
    if !inputs.marks_obtained.is_finite()
        || inputs.marks_obtained < 0.0
        || inputs.marks_obtained > inputs.total_marks
    {
        return Err(LedgerError::invalid(
            "marks obtained must be between 0 and total marks",
        ));
    }
    if !inputs.passing_marks.is_finite()
        || inputs.passing_marks < 0.0
        || inputs.passing_marks > inputs.total_marks
    {
        return Err(LedgerError::invalid(
            "passing marks must be between 0 and total marks",
        ));
    }

    let percentage = round2(inputs.marks_obtained / inputs.total_marks * 100.0);
    Ok(GradeSummary {
        percentage,
        grade: letter_grade(percentage),
        is_passed: inputs.marks_obtained >= inputs.passing_marks,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    HalfDay,
    OnLeave,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::HalfDay => "half_day",
            Self::OnLeave => "on_leave",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            "half_day" => Ok(Self::HalfDay),
            "on_leave" => Ok(Self::OnLeave),
            other => Err(LedgerError::invalid(format!(
                "unknown attendance status: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn fee(total: f64, paid: f64, late: f64, discount: f64, due: NaiveDate) -> FeeInputs {
        FeeInputs {
            total_amount: total,
            discount,
            late_fee: late,
            amount_paid: paid,
            due_date: due,
        }
    }

    #[test]
    fn unpaid_past_due_is_overdue() {
        let s = derive_fee(&fee(20000.0, 0.0, 0.0, 0.0, date(2025, 1, 31)), date(2025, 3, 1))
            .expect("derive");
        assert_eq!(s.status, FeeStatus::Overdue);
        assert_eq!(s.amount_pending, 20000.0);
        assert_eq!(s.amount_paid, 0.0);
    }

    #[test]
    fn partial_payment_wins_over_overdue() {
        let s = derive_fee(&fee(20000.0, 8000.0, 0.0, 0.0, date(2025, 1, 31)), date(2025, 3, 1))
            .expect("derive");
        assert_eq!(s.status, FeeStatus::Partial);
        assert_eq!(s.amount_pending, 12000.0);
    }

    #[test]
    fn unpaid_before_due_is_pending() {
        let s = derive_fee(&fee(5000.0, 0.0, 0.0, 0.0, date(2025, 6, 30)), date(2025, 6, 30))
            .expect("derive");
        assert_eq!(s.status, FeeStatus::Pending);
    }

    #[test]
    fn settled_fee_is_paid_even_past_due() {
        let s = derive_fee(&fee(5000.0, 5000.0, 0.0, 0.0, date(2025, 1, 1)), date(2025, 2, 1))
            .expect("derive");
        assert_eq!(s.status, FeeStatus::Paid);
        assert_eq!(s.amount_pending, 0.0);
    }

    #[test]
    fn late_fee_and_discount_enter_pending_amount() {
        let s = derive_fee(
            &fee(10000.0, 4000.0, 500.0, 1000.0, date(2025, 4, 1)),
            date(2025, 3, 1),
        )
        .expect("derive");
        // 10000 - 4000 + 500 - 1000
        assert!((s.amount_pending - 5500.0).abs() < 1e-9);
        assert_eq!(s.status, FeeStatus::Partial);
    }

    #[test]
    fn overpayment_keeps_raw_pending_but_reports_paid() {
        let s = derive_fee(&fee(1000.0, 1200.0, 0.0, 0.0, date(2025, 4, 1)), date(2025, 3, 1))
            .expect("derive");
        assert!((s.amount_pending - (-200.0)).abs() < 1e-9);
        assert_eq!(s.status, FeeStatus::Paid);
    }

    #[test]
    fn discount_alone_can_settle_a_fee() {
        let s = derive_fee(&fee(1000.0, 0.0, 0.0, 1000.0, date(2025, 4, 1)), date(2025, 5, 1))
            .expect("derive");
        assert_eq!(s.status, FeeStatus::Paid);
    }

    #[test]
    fn negative_fee_inputs_are_rejected() {
        let bad = derive_fee(&fee(-1.0, 0.0, 0.0, 0.0, date(2025, 4, 1)), date(2025, 3, 1));
        assert!(matches!(bad, Err(LedgerError::InvalidInput(_))));
        let bad = derive_fee(&fee(100.0, -5.0, 0.0, 0.0, date(2025, 4, 1)), date(2025, 3, 1));
        assert!(matches!(bad, Err(LedgerError::InvalidInput(_))));
        let bad = derive_fee(
            &fee(100.0, 0.0, f64::NAN, 0.0, date(2025, 4, 1)),
            date(2025, 3, 1),
        );
        assert!(matches!(bad, Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn payment_append_never_lowers_status() {
        // pending -> partial -> paid as payments accumulate against fixed debt.
        fn rank(s: FeeStatus) -> u8 {
            match s {
                FeeStatus::Overdue => 0,
                FeeStatus::Pending => 1,
                FeeStatus::Partial => 2,
                FeeStatus::Paid => 3,
            }
        }
        let today = date(2025, 3, 1);
        let due = date(2025, 6, 1);
        let mut paid = 0.0;
        let mut last_rank = 0;
        for step in [0.0, 2500.0, 2500.0, 5000.0] {
            paid += step;
            let s = derive_fee(&fee(10000.0, paid, 0.0, 0.0, due), today).expect("derive");
            assert!(rank(s.status) >= last_rank);
            last_rank = rank(s.status);
        }
        assert_eq!(last_rank, rank(FeeStatus::Paid));
    }

    fn salary(basic: f64, working: i64, absent: i64, half: i64) -> SalaryInputs {
        SalaryInputs {
            basic_salary: basic,
            allowances: Allowances::default(),
            deductions: Deductions::default(),
            tally: AttendanceTally {
                total_working_days: working,
                present_days: working - absent - half,
                absent_days: absent,
                leave_days: 0,
                half_days: half,
            },
        }
    }

    #[test]
    fn salary_scenario_two_absences() {
        let mut inputs = salary(50000.0, 30, 2, 0);
        inputs.deductions.tax = 5000.0;
        let s = derive_salary(&inputs).expect("derive");
        assert!((s.attendance_deduction - 3333.33).abs() < 1e-9);
        assert!((s.gross_salary - 50000.0).abs() < 1e-9);
        assert!((s.net_salary - (50000.0 - 5000.0 - 3333.33)).abs() < 1e-9);
    }

    #[test]
    fn full_attendance_means_no_deduction() {
        let s = derive_salary(&salary(42000.0, 26, 0, 0)).expect("derive");
        assert_eq!(s.attendance_deduction, 0.0);
        assert!((s.net_salary - s.gross_salary).abs() < 1e-9);
    }

    #[test]
    fn half_days_charge_half_a_day_each() {
        let s = derive_salary(&salary(30000.0, 30, 0, 3)).expect("derive");
        // 1000 per day, 1.5 chargeable days
        assert!((s.attendance_deduction - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn allowances_and_deductions_flow_through() {
        let mut inputs = salary(40000.0, 25, 1, 0);
        inputs.allowances = Allowances {
            house_rent: 8000.0,
            transport: 2000.0,
            medical: 1500.0,
            other: 500.0,
        };
        inputs.deductions = Deductions {
            tax: 3000.0,
            provident_fund: 2000.0,
            professional_tax: 200.0,
            other: 0.0,
        };
        let s = derive_salary(&inputs).expect("derive");
        assert!((s.gross_salary - 52000.0).abs() < 1e-9);
        let expected_deduction = round2(40000.0 / 25.0);
        assert!((s.attendance_deduction - expected_deduction).abs() < 1e-9);
        assert!(
            (s.net_salary - (s.gross_salary - 5200.0 - s.attendance_deduction)).abs() < 1e-9
        );
    }

    #[test]
    fn zero_working_days_fails_closed() {
        let bad = derive_salary(&salary(50000.0, 0, 0, 0));
        assert!(matches!(bad, Err(LedgerError::ZeroWorkingDays)));
    }

    #[test]
    fn negative_salary_components_are_rejected() {
        let mut inputs = salary(50000.0, 30, 0, 0);
        inputs.deductions.tax = -1.0;
        assert!(matches!(
            derive_salary(&inputs),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn payment_status_only_advances() {
        assert!(PaymentStatus::Pending.can_advance_to(PaymentStatus::Processing));
        assert!(PaymentStatus::Processing.can_advance_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Pending.can_advance_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_advance_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Processing.can_advance_to(PaymentStatus::Processing));
    }

    #[test]
    fn grade_scenario_88_percent_is_an_a() {
        let s = derive_grade(&GradeInputs {
            total_marks: 100.0,
            marks_obtained: 88.0,
            passing_marks: 33.0,
        })
        .expect("derive");
        assert_eq!(s.percentage, 88.0);
        assert_eq!(s.grade, "A");
        assert!(s.is_passed);
    }

    #[test]
    fn letter_thresholds_are_first_match() {
        assert_eq!(letter_grade(100.0), "A+");
        assert_eq!(letter_grade(90.0), "A+");
        assert_eq!(letter_grade(89.99), "A");
        assert_eq!(letter_grade(80.0), "A");
        assert_eq!(letter_grade(70.0), "B+");
        assert_eq!(letter_grade(60.0), "B");
        assert_eq!(letter_grade(50.0), "C+");
        assert_eq!(letter_grade(40.0), "C");
        assert_eq!(letter_grade(33.0), "D");
        assert_eq!(letter_grade(25.0), "E");
        assert_eq!(letter_grade(24.99), "F");
        assert_eq!(letter_grade(0.0), "F");
    }

    #[test]
    fn pass_flag_is_independent_of_letter() {
        // High passing bar: a B+ can still fail.
        let s = derive_grade(&GradeInputs {
            total_marks: 100.0,
            marks_obtained: 70.0,
            passing_marks: 75.0,
        })
        .expect("derive");
        assert_eq!(s.grade, "B+");
        assert!(!s.is_passed);

        // Exactly at the bar passes.
        let s = derive_grade(&GradeInputs {
            total_marks: 100.0,
            marks_obtained: 75.0,
            passing_marks: 75.0,
        })
        .expect("derive");
        assert!(s.is_passed);
    }

    #[test]
    fn grade_bounds_are_enforced() {
        assert!(matches!(
            derive_grade(&GradeInputs {
                total_marks: 0.0,
                marks_obtained: 0.0,
                passing_marks: 0.0,
            }),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_grade(&GradeInputs {
                total_marks: 100.0,
                marks_obtained: 101.0,
                passing_marks: 33.0,
            }),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_grade(&GradeInputs {
                total_marks: 100.0,
                marks_obtained: -1.0,
                passing_marks: 33.0,
            }),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_grade(&GradeInputs {
                total_marks: 100.0,
                marks_obtained: 50.0,
                passing_marks: 120.0,
            }),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn fractional_marks_round_half_up() {
        let s = derive_grade(&GradeInputs {
            total_marks: 30.0,
            marks_obtained: 20.0,
            passing_marks: 10.0,
        })
        .expect("derive");
        // 66.666... rounds to 66.67
        assert!((s.percentage - 66.67).abs() < 1e-9);
        assert_eq!(s.grade, "B");
    }

    #[test]
    fn status_strings_round_trip() {
        for raw in ["present", "absent", "late", "half_day", "on_leave"] {
            assert_eq!(AttendanceStatus::parse(raw).expect("parse").as_str(), raw);
        }
        assert!(AttendanceStatus::parse("holiday").is_err());
        for raw in ["tuition", "exam", "laboratory", "other"] {
            assert_eq!(FeeType::parse(raw).expect("parse").as_str(), raw);
        }
        assert!(FeeType::parse("hostel").is_err());
    }
}
