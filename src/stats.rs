use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Pass mark for a final grade. Fixed domain constant, not configurable.
pub const PASS_MARK: f64 = 40.0;

const BIN_WIDTH: f64 = 5.0;
const TOP_PROJECT_LIMIT: usize = 10;

/// Canonical letter scheme, highest threshold wins, lower bound inclusive.
const LETTER_STEPS: [(f64, &str); 10] = [
    (85.0, "A"),
    (80.0, "A-"),
    (75.0, "B+"),
    (70.0, "B"),
    (65.0, "B-"),
    (60.0, "C+"),
    (55.0, "C"),
    (50.0, "C-"),
    (45.0, "D+"),
    (40.0, "D"),
];

pub const LETTER_LABELS: [&str; 11] = [
    "A", "A-", "B+", "B", "B-", "C+", "C", "C-", "D+", "D", "F",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRecord {
    pub student_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matriculation_number: Option<String>,
    #[serde(default)]
    pub final_grade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_grade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_grade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub letter_grade: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGradeSummary {
    pub project_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_name: Option<String>,
    #[serde(default)]
    pub students: Vec<StudentGradeRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    /// When set, a final grade of exactly 0 counts as "not yet graded" and is
    /// dropped from every aggregate, matching the stricter dashboard variant.
    pub treat_zero_as_ungraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveStats {
    pub average: String,
    pub max: f64,
    pub min: f64,
    pub count: usize,
    pub std_dev: String,
    pub median: String,
    pub passing_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BellCurveBin {
    pub bin_label: String,
    pub histogram_count: usize,
    pub scaled_normal_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRanking {
    pub project_id: String,
    pub title: String,
    pub average_grade: f64,
    pub student_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeTiers {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub poor: usize,
    pub failing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub stats: Option<DescriptiveStats>,
    pub letter_grade_distribution: Map<String, Value>,
    pub bell_curve: Vec<BellCurveBin>,
    pub top_projects: Vec<ProjectRanking>,
    pub grade_tiers: GradeTiers,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn fmt2(x: f64) -> String {
    format!("{:.2}", x)
}

pub fn letter_for(grade: f64) -> &'static str {
    for (threshold, label) in LETTER_STEPS {
        if grade >= threshold {
            return label;
        }
    }
    "F"
}

fn valid_grade(record: &StudentGradeRecord, opts: SummaryOptions) -> Option<f64> {
    let g = record.final_grade?;
    if !g.is_finite() {
        return None;
    }
    if opts.treat_zero_as_ungraded && g == 0.0 {
        return None;
    }
    Some(g)
}

fn compute_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

fn tier_counts(grades: &[f64]) -> GradeTiers {
    let mut tiers = GradeTiers::default();
    for &g in grades {
        if g >= 85.0 {
            tiers.excellent += 1;
        } else if g >= 70.0 {
            tiers.good += 1;
        } else if g >= 55.0 {
            tiers.average += 1;
        } else if g >= 40.0 {
            tiers.poor += 1;
        } else {
            tiers.failing += 1;
        }
    }
    tiers
}

fn letter_distribution(grades: &[f64]) -> Map<String, Value> {
    let mut counts = [0usize; LETTER_LABELS.len()];
    for &g in grades {
        let label = letter_for(g);
        let idx = LETTER_LABELS
            .iter()
            .position(|l| *l == label)
            .unwrap_or(LETTER_LABELS.len() - 1);
        counts[idx] += 1;
    }
    let mut out = Map::new();
    for (label, count) in LETTER_LABELS.iter().zip(counts.iter()) {
        out.insert((*label).to_string(), json!(count));
    }
    out
}

fn bell_curve(grades: &[f64], mean: f64, std_dev: f64) -> Vec<BellCurveBin> {
    let min = grades.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = grades.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let bin_min = (min / BIN_WIDTH).floor() * BIN_WIDTH;
    let bin_max = (max / BIN_WIDTH).ceil() * BIN_WIDTH;
    let bin_count = ((bin_max - bin_min) / BIN_WIDTH) as usize + 1;

    let mut counts = vec![0usize; bin_count];
    for &g in grades {
        // A grade exactly on the upper edge belongs to the last bin.
        let idx = (((g - bin_min) / BIN_WIDTH).floor() as usize).min(bin_count - 1);
        counts[idx] += 1;
    }

    let n = grades.len() as f64;
    (0..bin_count)
        .map(|i| {
            let lower = bin_min + (i as f64) * BIN_WIDTH;
            // Area-matched Gaussian overlay; a zero std dev means all grades are
            // identical, so the curve is suppressed rather than dividing by zero.
            let scaled = if std_dev > 0.0 {
                let z = (lower - mean) / std_dev;
                let density = (-0.5 * z * z).exp()
                    / (std_dev * (2.0 * std::f64::consts::PI).sqrt());
                density * n * BIN_WIDTH
            } else {
                0.0
            };
            BellCurveBin {
                bin_label: format!("{}", lower as i64),
                histogram_count: counts[i],
                scaled_normal_value: scaled,
            }
        })
        .collect()
}

fn top_projects(projects: &[ProjectGradeSummary], opts: SummaryOptions) -> Vec<ProjectRanking> {
    let mut ranked: Vec<ProjectRanking> = projects
        .iter()
        .filter_map(|p| {
            let grades: Vec<f64> = p
                .students
                .iter()
                .filter_map(|s| valid_grade(s, opts))
                .collect();
            if grades.is_empty() {
                return None;
            }
            let avg = grades.iter().sum::<f64>() / (grades.len() as f64);
            Some(ProjectRanking {
                project_id: p.project_id.clone(),
                title: p.title.clone(),
                average_grade: round2(avg),
                student_count: grades.len(),
            })
        })
        .collect();
    // Stable sort so ties retain their incoming relative order.
    ranked.sort_by(|a, b| {
        b.average_grade
            .partial_cmp(&a.average_grade)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(TOP_PROJECT_LIMIT);
    ranked
}

/// Summarize per-project grade records into descriptive statistics, a letter
/// distribution, a bell-curve dataset, tier counts, and a top-project ranking.
///
/// Pure over its input: never errors, never mutates. Empty or all-invalid input
/// yields the no-data sentinel (`stats: None`, empty distribution and curves,
/// all-zero tiers).
pub fn summarize(projects: &[ProjectGradeSummary], opts: SummaryOptions) -> GradeSummary {
    let grades: Vec<f64> = projects
        .iter()
        .flat_map(|p| p.students.iter())
        .filter_map(|s| valid_grade(s, opts))
        .collect();

    if grades.is_empty() {
        return GradeSummary {
            stats: None,
            letter_grade_distribution: Map::new(),
            bell_curve: Vec::new(),
            top_projects: Vec::new(),
            grade_tiers: GradeTiers::default(),
        };
    }

    let n = grades.len();
    let mean = grades.iter().sum::<f64>() / (n as f64);
    let variance = grades.iter().map(|g| (g - mean) * (g - mean)).sum::<f64>() / (n as f64);
    let std_dev = variance.sqrt();
    let max = grades.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = grades.iter().cloned().fold(f64::INFINITY, f64::min);
    let passing = grades.iter().filter(|g| **g >= PASS_MARK).count();

    let mut sorted = grades.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median = compute_median(&sorted);

    GradeSummary {
        stats: Some(DescriptiveStats {
            average: fmt2(mean),
            max,
            min,
            count: n,
            std_dev: fmt2(std_dev),
            median: fmt2(median),
            passing_rate: fmt2(100.0 * (passing as f64) / (n as f64)),
        }),
        letter_grade_distribution: letter_distribution(&grades),
        bell_curve: bell_curve(&grades, mean, std_dev),
        top_projects: top_projects(projects, opts),
        grade_tiers: tier_counts(&grades),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, grade: Option<f64>) -> StudentGradeRecord {
        StudentGradeRecord {
            student_id: id.to_string(),
            name: None,
            matriculation_number: None,
            final_grade: grade,
            supervisor_grade: None,
            moderator_grade: None,
            letter_grade: None,
        }
    }

    fn project(id: &str, grades: &[Option<f64>]) -> ProjectGradeSummary {
        ProjectGradeSummary {
            project_id: id.to_string(),
            title: format!("Project {}", id),
            supervisor_name: None,
            moderator_name: None,
            students: grades
                .iter()
                .enumerate()
                .map(|(i, g)| student(&format!("{}-s{}", id, i), *g))
                .collect(),
        }
    }

    #[test]
    fn empty_input_yields_no_data_sentinel() {
        for input in [
            Vec::new(),
            vec![project("p1", &[None, None])],
        ] {
            let summary = summarize(&input, SummaryOptions::default());
            assert!(summary.stats.is_none());
            assert!(summary.letter_grade_distribution.is_empty());
            assert!(summary.bell_curve.is_empty());
            assert!(summary.top_projects.is_empty());
            assert_eq!(summary.grade_tiers, GradeTiers::default());
        }
    }

    #[test]
    fn non_finite_grades_are_treated_as_absent() {
        let input = vec![project(
            "p1",
            &[Some(60.0), Some(f64::NAN), Some(f64::INFINITY), None, Some(0.0)],
        )];
        let summary = summarize(&input, SummaryOptions::default());
        let stats = summary.stats.expect("stats");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max, 60.0);
        assert_eq!(stats.min, 0.0);
    }

    #[test]
    fn zero_policy_flag_drops_exact_zeros() {
        let input = vec![project("p1", &[Some(60.0), Some(0.0), Some(0.0)])];
        let opts = SummaryOptions {
            treat_zero_as_ungraded: true,
        };
        let summary = summarize(&input, opts);
        let stats = summary.stats.expect("stats");
        assert_eq!(stats.count, 1);
        assert_eq!(stats.average, "60.00");
    }

    #[test]
    fn median_handles_odd_and_even_counts() {
        let odd = summarize(
            &[project("p1", &[Some(40.0), Some(50.0), Some(60.0)])],
            SummaryOptions::default(),
        );
        assert_eq!(odd.stats.expect("stats").median, "50.00");

        let even = summarize(
            &[project("p1", &[Some(40.0), Some(50.0), Some(60.0), Some(70.0)])],
            SummaryOptions::default(),
        );
        assert_eq!(even.stats.expect("stats").median, "55.00");
    }

    #[test]
    fn identical_grades_give_zero_stddev_and_a_finite_curve() {
        let summary = summarize(
            &[project("p1", &[Some(50.0), Some(50.0), Some(50.0)])],
            SummaryOptions::default(),
        );
        let stats = summary.stats.expect("stats");
        assert_eq!(stats.std_dev, "0.00");
        assert!(!summary.bell_curve.is_empty());
        for bin in &summary.bell_curve {
            assert!(bin.scaled_normal_value.is_finite());
            assert_eq!(bin.scaled_normal_value, 0.0);
        }
        let total: usize = summary.bell_curve.iter().map(|b| b.histogram_count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn letter_boundaries_are_lower_inclusive() {
        assert_eq!(letter_for(85.0), "A");
        assert_eq!(letter_for(84.9), "A-");
        assert_eq!(letter_for(80.0), "A-");
        assert_eq!(letter_for(70.0), "B");
        assert_eq!(letter_for(40.0), "D");
        assert_eq!(letter_for(39.99), "F");
        assert_eq!(letter_for(0.0), "F");
    }

    #[test]
    fn tier_and_letter_counts_partition_the_valid_grades() {
        let input = vec![
            project("p1", &[Some(92.0), Some(85.0), Some(71.5), Some(55.0)]),
            project("p2", &[Some(40.0), Some(39.9), Some(0.0), None]),
        ];
        let summary = summarize(&input, SummaryOptions::default());
        let stats = summary.stats.expect("stats");
        assert_eq!(stats.count, 7);

        let tiers = summary.grade_tiers;
        let tier_sum = tiers.excellent + tiers.good + tiers.average + tiers.poor + tiers.failing;
        assert_eq!(tier_sum, stats.count);

        let letter_sum: u64 = summary
            .letter_grade_distribution
            .values()
            .map(|v| v.as_u64().unwrap_or(0))
            .sum();
        assert_eq!(letter_sum as usize, stats.count);

        let labels: Vec<&str> = summary
            .letter_grade_distribution
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(labels, LETTER_LABELS.to_vec());
    }

    #[test]
    fn histogram_conserves_every_grade_including_the_upper_edge() {
        let input = vec![project("p1", &[Some(41.0), Some(73.0), Some(100.0)])];
        let summary = summarize(&input, SummaryOptions::default());
        let total: usize = summary.bell_curve.iter().map(|b| b.histogram_count).sum();
        assert_eq!(total, 3);
        assert_eq!(summary.bell_curve.first().expect("bins").bin_label, "40");
        let last = summary.bell_curve.last().expect("bins");
        assert_eq!(last.bin_label, "100");
        assert_eq!(last.histogram_count, 1);
    }

    #[test]
    fn top_projects_are_bounded_sorted_and_tie_stable() {
        let mut input: Vec<ProjectGradeSummary> = (0..12)
            .map(|i| project(&format!("p{}", i), &[Some(50.0 + i as f64)]))
            .collect();
        input.push(project("tie-a", &[Some(70.0)]));
        input.push(project("tie-b", &[Some(70.0)]));
        input.push(project("unranked", &[None]));

        let summary = summarize(&input, SummaryOptions::default());
        assert_eq!(summary.top_projects.len(), 10);
        for pair in summary.top_projects.windows(2) {
            assert!(pair[0].average_grade >= pair[1].average_grade);
        }
        assert!(!summary.top_projects.iter().any(|p| p.project_id == "unranked"));

        let tie_a = summary
            .top_projects
            .iter()
            .position(|p| p.project_id == "tie-a");
        let tie_b = summary
            .top_projects
            .iter()
            .position(|p| p.project_id == "tie-b");
        if let (Some(a), Some(b)) = (tie_a, tie_b) {
            assert!(a < b);
        }
    }

    #[test]
    fn two_project_worked_example() {
        let input = vec![
            project("proj-a", &[Some(90.0), Some(80.0), Some(40.0)]),
            project("proj-b", &[Some(30.0), Some(0.0)]),
        ];
        let summary = summarize(&input, SummaryOptions::default());
        let stats = summary.stats.expect("stats");
        assert_eq!(stats.count, 5);
        assert_eq!(stats.average, "48.00");
        assert_eq!(stats.passing_rate, "60.00");

        let tiers = summary.grade_tiers;
        assert_eq!(tiers.excellent, 1);
        assert_eq!(tiers.good, 1);
        assert_eq!(tiers.average, 0);
        assert_eq!(tiers.poor, 1);
        assert_eq!(tiers.failing, 2);

        let top = summary.top_projects.first().expect("ranking");
        assert_eq!(top.project_id, "proj-a");
        assert!((top.average_grade - 70.0).abs() < 1e-9);
        assert_eq!(top.student_count, 3);
    }

    #[test]
    fn canonical_schema_deserializes_camel_case() {
        let raw = serde_json::json!({
            "projectId": "p1",
            "title": "Smart Campus",
            "supervisorName": "Dr. Tan",
            "students": [
                { "studentId": "s1", "matriculationNumber": "U190001", "finalGrade": 67.5 },
                { "studentId": "s2", "finalGrade": null }
            ]
        });
        let parsed: ProjectGradeSummary = serde_json::from_value(raw).expect("parse");
        assert_eq!(parsed.students.len(), 2);
        assert_eq!(parsed.students[0].final_grade, Some(67.5));
        assert_eq!(parsed.students[1].final_grade, None);
    }
}
