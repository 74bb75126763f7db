use serde::{Deserialize, Serialize};

use crate::models::{AnalysisRecord, FarmerProfile};

pub const PLOT_COUNT: usize = 16;

// ==============================================================================
// DERIVED FROM HISTORY
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub diseased: usize,
}

impl HealthSummary {
    pub fn from_history(history: &[AnalysisRecord]) -> Self {
        let healthy = history.iter().filter(|r| r.is_healthy()).count();
        Self {
            total: history.len(),
            healthy,
            diseased: history.len() - healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlotStatus {
    Healthy,
    Diseased,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldPlot {
    pub plot: usize,
    pub status: PlotStatus,
    pub tooltip: String,
}

/// One plot per history entry, newest in plot 1.
pub fn field_layout(history: &[AnalysisRecord]) -> Vec<FieldPlot> {
    (0..PLOT_COUNT)
        .map(|index| {
            let plot = index + 1;
            match history.get(index) {
                Some(record) => FieldPlot {
                    plot,
                    status: if record.is_healthy() { PlotStatus::Healthy } else { PlotStatus::Diseased },
                    tooltip: format!(
                        "Plot {}: {} ({}%)",
                        plot, record.problem_identified, record.confidence_percentage
                    ),
                },
                None => FieldPlot {
                    plot,
                    status: PlotStatus::Unknown,
                    tooltip: format!("Plot {}: No data", plot),
                },
            }
        })
        .collect()
}

// ==============================================================================
// MOCK WIDGETS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temperature_celsius: i32,
    pub condition: String,
    pub wind_kmh: i32,
    pub humidity_percent: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyForecast {
    pub day: String,
    pub temperature_celsius: i32,
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherUpdate {
    pub district: String,
    pub current: CurrentWeather,
    pub forecast: Vec<DailyForecast>,
}

impl WeatherUpdate {
    pub fn mock(district: &str) -> Self {
        let forecast = [
            ("Mon", 33, "Sunny"),
            ("Tue", 34, "Sunny"),
            ("Wed", 31, "Rain"),
            ("Thu", 32, "Cloudy"),
            ("Fri", 35, "Sunny"),
        ]
        .into_iter()
        .map(|(day, temp, condition)| DailyForecast {
            day: day.to_string(),
            temperature_celsius: temp,
            condition: condition.to_string(),
        })
        .collect();

        Self {
            district: district.to_string(),
            current: CurrentWeather {
                temperature_celsius: 32,
                condition: "Partly Cloudy".to_string(),
                wind_kmh: 15,
                humidity_percent: 70,
            },
            forecast,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandiPrice {
    pub mandi: String,
    pub price: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketWatch {
    pub crop_type: String,
    pub prices: Vec<MandiPrice>,
    pub trending: Vec<String>,
    pub forecast: String,
}

impl MarketWatch {
    pub fn mock(crop_type: &str) -> Self {
        Self {
            crop_type: crop_type.to_string(),
            prices: [
                ("Guntur", "₹7,200/quintal"),
                ("Kurnool", "₹7,150/quintal"),
                ("Vijayawada", "₹7,250/quintal"),
            ]
            .into_iter()
            .map(|(mandi, price)| MandiPrice {
                mandi: mandi.to_string(),
                price: price.to_string(),
            })
            .collect(),
            trending: vec!["Cotton".to_string(), "Turmeric".to_string(), "Onion".to_string()],
            forecast: "Prices expected to rise 5-7% in the next 2 weeks.".to_string(),
        }
    }
}

// ==============================================================================
// DASHBOARD
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub farmer_name: String,
    pub health_summary: HealthSummary,
    pub field_layout: Vec<FieldPlot>,
    pub weather: WeatherUpdate,
    pub market: MarketWatch,
}

impl Dashboard {
    pub fn build(profile: &FarmerProfile, history: &[AnalysisRecord]) -> Self {
        Self {
            farmer_name: profile.name.clone(),
            health_summary: HealthSummary::from_history(history),
            field_layout: field_layout(history),
            weather: WeatherUpdate::mock(&profile.district),
            market: MarketWatch::mock(&profile.crop_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{analysis, farmer};
    use chrono::Utc;

    fn history(labels: &[&str]) -> Vec<AnalysisRecord> {
        labels
            .iter()
            .map(|l| AnalysisRecord::new(analysis(l), Utc::now()))
            .collect()
    }

    #[test]
    fn summary_counts_healthy_case_insensitively() {
        let summary = HealthSummary::from_history(&history(&["Healthy", "HEALTHY", "Early Blight"]));
        assert_eq!(summary, HealthSummary { total: 3, healthy: 2, diseased: 1 });
    }

    #[test]
    fn empty_history_gives_zero_summary_and_unknown_plots() {
        assert_eq!(HealthSummary::from_history(&[]).total, 0);
        let plots = field_layout(&[]);
        assert_eq!(plots.len(), PLOT_COUNT);
        assert!(plots.iter().all(|p| p.status == PlotStatus::Unknown));
        assert_eq!(plots[0].tooltip, "Plot 1: No data");
    }

    #[test]
    fn plots_follow_history_order() {
        let plots = field_layout(&history(&["Early Blight", "Healthy"]));
        assert_eq!(plots[0].status, PlotStatus::Diseased);
        assert_eq!(plots[0].tooltip, "Plot 1: Early Blight (92%)");
        assert_eq!(plots[1].status, PlotStatus::Healthy);
        assert_eq!(plots[2].status, PlotStatus::Unknown);
    }

    #[test]
    fn layout_ignores_history_beyond_plot_count() {
        let labels = vec!["Healthy"; PLOT_COUNT + 4];
        assert_eq!(field_layout(&history(&labels)).len(), PLOT_COUNT);
    }

    #[test]
    fn dashboard_uses_profile_location_and_crop() {
        let dashboard = Dashboard::build(&farmer(), &[]);
        assert_eq!(dashboard.weather.district, "Guntur");
        assert_eq!(dashboard.market.crop_type, "Chilli");
        assert_eq!(dashboard.weather.forecast.len(), 5);
    }
}
