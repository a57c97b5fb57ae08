//! Catalogue entity bindings.
//!
//! Each type here only declares its identity, its tree name and, for lists,
//! which parent it is scoped to. All caching behavior comes from the generic
//! stores and repositories.

use crate::domain::{CacheKey, Collection, Entity, Global, PagedList};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type MovieId = u64;
pub type PersonId = u64;
pub type SeriesId = u64;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

/// Movie detail
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub overview: String,
    pub release_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub vote_average: f32,
    pub runtime_minutes: Option<u32>,
    pub genres: Vec<Genre>,
}

impl Entity for Movie {
    type Key = MovieId;
    const NAME: &'static str = "movie";

    fn key(&self) -> MovieId {
        self.id
    }
}

/// Movie as it appears in a list row
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoviePreview {
    pub id: MovieId,
    pub title: String,
    pub poster_path: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub vote_average: f32,
}

impl Entity for MoviePreview {
    type Key = MovieId;
    const NAME: &'static str = "movie_preview";

    fn key(&self) -> MovieId {
        self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: PersonId,
    pub name: String,
    pub character: String,
    pub order: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: PersonId,
    pub name: String,
    pub department: String,
    pub job: String,
}

/// Credits of one movie, cached and replaced as a single aggregate
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    pub movie_id: MovieId,
    pub cast: Vec<CastMember>,
    pub crew: Vec<CrewMember>,
}

impl Entity for Credits {
    type Key = MovieId;
    const NAME: &'static str = "movie_credits";

    fn key(&self) -> MovieId {
        self.movie_id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub biography: String,
    pub birthday: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub profile_path: Option<String>,
    pub known_for_department: Option<String>,
}

impl Entity for Person {
    type Key = PersonId;
    const NAME: &'static str = "person";

    fn key(&self) -> PersonId {
        self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season_number: u32,
    pub name: String,
    pub episode_count: u32,
    pub air_date: Option<NaiveDate>,
}

/// Series detail with its seasons nested in the same record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TvSeries {
    pub id: SeriesId,
    pub name: String,
    pub overview: String,
    pub first_air_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub vote_average: f32,
    pub genres: Vec<Genre>,
    pub seasons: Vec<SeasonSummary>,
}

impl Entity for TvSeries {
    type Key = SeriesId;
    const NAME: &'static str = "tv_series";

    fn key(&self) -> SeriesId {
        self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TvSeriesPreview {
    pub id: SeriesId,
    pub name: String,
    pub poster_path: Option<String>,
    pub first_air_date: Option<NaiveDate>,
    pub vote_average: f32,
}

impl Entity for TvSeriesPreview {
    type Key = SeriesId;
    const NAME: &'static str = "tv_series_preview";

    fn key(&self) -> SeriesId {
        self.id
    }
}

/// (series, season number)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeasonKey {
    pub series_id: SeriesId,
    pub season_number: u32,
}

impl SeasonKey {
    pub fn new(series_id: SeriesId, season_number: u32) -> Self {
        Self {
            series_id,
            season_number,
        }
    }
}

impl Display for SeasonKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.series_id, self.season_number)
    }
}

impl CacheKey for SeasonKey {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.series_id.encode(buf);
        self.season_number.encode(buf);
    }
}

/// (series, season number, episode number)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeKey {
    pub series_id: SeriesId,
    pub season_number: u32,
    pub episode_number: u32,
}

impl EpisodeKey {
    pub fn new(series_id: SeriesId, season_number: u32, episode_number: u32) -> Self {
        Self {
            series_id,
            season_number,
            episode_number,
        }
    }

    pub fn season(&self) -> SeasonKey {
        SeasonKey::new(self.series_id, self.season_number)
    }
}

impl Display for EpisodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.series_id, self.season_number, self.episode_number)
    }
}

impl CacheKey for EpisodeKey {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.season().encode(buf);
        self.episode_number.encode(buf);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TvEpisode {
    pub series_id: SeriesId,
    pub season_number: u32,
    pub episode_number: u32,
    pub name: String,
    pub overview: String,
    pub air_date: Option<NaiveDate>,
    pub still_path: Option<String>,
}

impl Entity for TvEpisode {
    type Key = EpisodeKey;
    const NAME: &'static str = "tv_episode";

    fn key(&self) -> EpisodeKey {
        EpisodeKey::new(self.series_id, self.season_number, self.episode_number)
    }
}

/// Season detail with its episodes nested in the same record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TvSeason {
    pub series_id: SeriesId,
    pub season_number: u32,
    pub name: String,
    pub overview: String,
    pub air_date: Option<NaiveDate>,
    pub episodes: Vec<TvEpisode>,
}

impl Entity for TvSeason {
    type Key = SeasonKey;
    const NAME: &'static str = "tv_season";

    fn key(&self) -> SeasonKey {
        SeasonKey::new(self.series_id, self.season_number)
    }
}

macro_rules! paged_list {
    ($(#[$meta:meta])* $list:ident, $parent:ty, $item:ty, $name:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug)]
        pub struct $list;

        impl PagedList for $list {
            type Parent = $parent;
            type Item = $item;
            const NAME: &'static str = $name;
        }
    };
}

paged_list!(PopularMovies, Global, MoviePreview, "popular_movies");
paged_list!(TopRatedMovies, Global, MoviePreview, "top_rated_movies");
paged_list!(
    /// Movies similar to the parent movie
    SimilarMovies,
    MovieId,
    MoviePreview,
    "similar_movies"
);
paged_list!(
    /// Recommendations for the parent movie
    RecommendedMovies,
    MovieId,
    MoviePreview,
    "recommended_movies"
);
paged_list!(TrendingTvSeries, Global, TvSeriesPreview, "trending_tv_series");
paged_list!(PopularTvSeries, Global, TvSeriesPreview, "popular_tv_series");

#[derive(Clone, Copy, Debug)]
pub struct Watchlist;

impl Collection for Watchlist {
    type Id = MovieId;
    const NAME: &'static str = "watchlist";
}

#[derive(Clone, Copy, Debug)]
pub struct Favourites;

impl Collection for Favourites {
    type Id = MovieId;
    const NAME: &'static str = "favourites";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_keys_group_under_their_season() {
        let season = SeasonKey::new(1, 2).to_bytes();
        let episode = EpisodeKey::new(1, 2, 7).to_bytes();
        let other_season = EpisodeKey::new(1, 3, 1).to_bytes();

        assert!(episode.starts_with(&season));
        assert!(!other_season.starts_with(&season));
    }

    #[test]
    fn test_composite_keys_sort_by_field_order() {
        assert!(EpisodeKey::new(1, 2, 10).to_bytes() < EpisodeKey::new(1, 3, 1).to_bytes());
        assert!(SeasonKey::new(1, 99).to_bytes() < SeasonKey::new(2, 0).to_bytes());
    }

    #[test]
    fn test_tree_names_are_distinct() {
        let names = [
            Movie::NAME,
            MoviePreview::NAME,
            Credits::NAME,
            Person::NAME,
            TvSeries::NAME,
            TvSeriesPreview::NAME,
            TvSeason::NAME,
            TvEpisode::NAME,
            PopularMovies::NAME,
            TopRatedMovies::NAME,
            SimilarMovies::NAME,
            RecommendedMovies::NAME,
            TrendingTvSeries::NAME,
            PopularTvSeries::NAME,
            Watchlist::NAME,
            Favourites::NAME,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_key_display_is_readable() {
        assert_eq!(EpisodeKey::new(10, 1, 3).to_string(), "10/1/3");
        assert_eq!(EpisodeKey::new(10, 1, 3).season().to_string(), "10/1");
    }
}
