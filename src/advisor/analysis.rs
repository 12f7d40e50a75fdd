use serde::{Deserialize, Serialize};

/// Region assumed when a request leaves it blank.
pub const DEFAULT_REGION: &str = "Vellore, Tamil Nadu, India";

/// Kind of advice asked for. `Ideas` is the personalised questionnaire; the
/// rest are fixed analyses scoped to the request's region.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Ideas,
    Trend,
    EcoProducts,
    Regional,
    Custom,
}

impl AnalysisType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ideas => "Business Ideas",
            Self::Trend => "Trend Analysis",
            Self::EcoProducts => "Eco-Friendly Products",
            Self::Regional => "Regional Insights",
            Self::Custom => "Custom Analysis",
        }
    }

    /// The analysis-specific ask. `None` for `Ideas`, whose prompt is built
    /// from the questionnaire instead.
    pub(crate) fn ask(self, region: &str) -> Option<String> {
        let ask = match self {
            Self::Ideas => return None,
            Self::Trend => format!(
                "Analyse the market trends expected this year and suggest 5 eco-friendly \
                 business ideas with high demand and a low environmental footprint for {region}."
            ),
            Self::EcoProducts => "Suggest 7 eco-friendly product ideas built on recyclable or \
                 renewable materials that would sell well in the local market."
                .to_string(),
            Self::Regional => format!(
                "Describe the local market in {region}: who the customers are, what they \
                 need, and which sustainable businesses have room to grow."
            ),
            Self::Custom => format!(
                "Write a full business analysis for {region} covering market trends, \
                 eco-friendly opportunities and regional insights, with a short plan \
                 for each recommended business."
            ),
        };
        Some(ask)
    }

    /// Canned answer used when the model cannot be reached.
    pub fn fallback(self) -> &'static str {
        match self {
            Self::Ideas => FALLBACK_IDEAS,
            Self::Trend => FALLBACK_TREND,
            Self::EcoProducts => FALLBACK_ECO_PRODUCTS,
            Self::Regional => FALLBACK_REGIONAL,
            Self::Custom => FALLBACK_CUSTOM,
        }
    }
}

pub(crate) const FALLBACK_IDEAS: &str = "\
Here are a few business ideas to get you started while the AI advisor is offline:

1. **Refill & zero-waste store** - sell household staples in reusable containers, \
online with local delivery. Low inventory risk, strong repeat demand.
2. **Handmade goods marketplace shop** - curate regional crafts and sell them on \
online marketplaces. Start with a small catalogue and grow from reviews.
3. **Home tiffin / meal-prep service** - weekly subscriptions for office workers \
and students. Needs a licensed kitchen and reliable delivery partners.
4. **Upcycled fashion** - restyle second-hand clothing and sell through social \
media storefronts. Low startup cost, eco-friendly by design.
5. **Online tutoring hub** - pair local tutors with students over video calls. \
Asset-light, scales with the number of tutors.

For each idea, validate demand with a small pilot before investing heavily.";

const FALLBACK_TREND: &str = "\
# Market Trends

## Five eco-friendly ideas in demand

1. **Biodegradable packaging** - supply e-commerce sellers and restaurants.
   - Startup cost: Rs 5-8 lakh
2. **Organic waste management** - composting services for apartments and offices.
   - Startup cost: Rs 3-5 lakh
3. **Solar water purification** - units for schools and rural communities.
   - Startup cost: Rs 8-12 lakh
4. **Green cleaning products** - refills for households, offices and clinics.
   - Startup cost: Rs 2-4 lakh
5. **Sustainable accessories** - bags and jewellery from reclaimed material.
   - Startup cost: Rs 4-7 lakh

## What is driving demand
- More shoppers choose products with a smaller footprint
- Government schemes favour sustainable small businesses
- Locally made goods are gaining ground on imports";

const FALLBACK_ECO_PRODUCTS: &str = "\
# Sustainable Product Ideas

1. **Bamboo household goods** - toothbrushes, utensils, storage boxes.
   - Margins of 40-60% are common
2. **Recycled paper stationery** - notebooks, gift wrap, office supplies.
3. **Organic cotton bags** - shopping and produce bags for retailers.
4. **Compostable food packaging** - plates, cups and takeaway boxes.
5. **Solar gadgets** - chargers, lamps and fans; subsidies may apply.
6. **Coir and jute home decor** - mats and planters from local fibre.
7. **Refillable personal care** - soaps and shampoos sold by weight.

## Selling points
- Biodegradable or recyclable materials
- Minimal packaging
- Local sourcing keeps transport emissions low";

const FALLBACK_REGIONAL: &str = "\
# Regional Insights

## Who buys
- A large student population with an eye for sustainable brands
- Farming households with access to organic raw material
- A growing IT workforce with more disposable income

## Openings
1. **Student eco products** - reusable stationery and daily-use items.
2. **Farm-to-table delivery** - partner directly with nearby growers.
3. **Eco-tourism** - heritage walks and low-impact travel packages.
4. **Green tech services** - rooftop solar, water saving, waste handling.

## Local resources
- Raw agricultural material is easy to source
- Skilled artisans are available for handmade goods
- Universities are open to research partnerships";

const FALLBACK_CUSTOM: &str = "\
# Business Analysis

## Recommended ventures

1. **Eco food packaging** - investment Rs 8-12 lakh, break-even around 18 months.
2. **Waste-to-energy unit** - investment Rs 15-25 lakh, break-even around 24 months.
3. **Sustainable fashion store online** - investment Rs 5-8 lakh, break-even around 12 months.
4. **Solar installation service** - investment Rs 10-15 lakh, break-even around 20 months.
5. **Eco-tourism platform** - investment Rs 3-5 lakh, break-even around 15 months.

## First year plan
- **Months 1-2**: register the business and obtain permits
- **Months 3-4**: build and test the product
- **Months 5-6**: hire and start marketing
- **Months 7-12**: launch, win first customers, then scale";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_analysis_has_its_own_fallback() {
        let all = [
            AnalysisType::Ideas,
            AnalysisType::Trend,
            AnalysisType::EcoProducts,
            AnalysisType::Regional,
            AnalysisType::Custom,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.fallback(), b.fallback(), "{a:?} and {b:?} share a fallback");
            }
        }
    }

    #[test]
    fn wire_names_are_snake_case() {
        let t: AnalysisType = serde_json::from_str("\"eco_products\"").unwrap();
        assert_eq!(t, AnalysisType::EcoProducts);
        assert_eq!(serde_json::to_string(&AnalysisType::Regional).unwrap(), "\"regional\"");
    }

    #[test]
    fn asks_mention_region_where_relevant() {
        assert!(AnalysisType::Ideas.ask("Lyon").is_none());
        assert!(AnalysisType::Trend.ask("Lyon").unwrap().contains("Lyon"));
        assert!(AnalysisType::Regional.ask("Lyon").unwrap().contains("Lyon"));
    }
}
